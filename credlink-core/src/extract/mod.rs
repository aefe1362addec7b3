//! Multi-method manifest extraction
//!
//! The [`ExtractionCoordinator`] runs [`RecoveryMethod`]s strictly in
//! priority order and stops at the first one that recovers something. Each
//! method's confidence is capped by the ceiling of its rank, so a lower-ranked
//! method can never outscore a higher-ranked one.

mod methods;

pub use methods::{
    CborScanMethod, ContainerChunkMethod, ExifPrimaryMethod, ExifSecondaryMethod,
    NativeChunkMethod, PatternScanMethod, XmpMethod,
};

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::ExtractConfig;
use crate::format::ImageFormat;
use crate::manifest::{Manifest, ProofReference};

/// Confidence at or above which a signed manifest counts as full integrity.
pub const FULL_INTEGRITY_THRESHOLD: u8 = 80;

/// Where the recovered data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    ContainerChunk,
    FormatNativeChunk,
    XmpChunk,
    ExifPrimary,
    ExifSecondary,
    BinaryPatternMatch,
    None,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::ContainerChunk => "container-chunk",
            Source::FormatNativeChunk => "format-native-chunk",
            Source::XmpChunk => "xmp-chunk",
            Source::ExifPrimary => "exif-primary",
            Source::ExifSecondary => "exif-secondary",
            Source::BinaryPatternMatch => "binary-pattern-match",
            Source::None => "none",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the claim survived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrity {
    /// Signed manifest recovered from a high-confidence method
    Full,
    /// Proof reference only, or an unsigned / low-confidence manifest
    Partial,
    /// Provenance data was present but failed validation, nothing recovered
    Corrupted,
    None,
}

/// Recovery methods in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodKind {
    ContainerChunk,
    NativeChunk,
    Xmp,
    ExifPrimary,
    ExifSecondary,
    CborScan,
    PatternScan,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::ContainerChunk => "container-chunk",
            MethodKind::NativeChunk => "native-chunk",
            MethodKind::Xmp => "xmp",
            MethodKind::ExifPrimary => "exif-primary",
            MethodKind::ExifSecondary => "exif-secondary",
            MethodKind::CborScan => "cbor-scan",
            MethodKind::PatternScan => "pattern-scan",
        }
    }

    pub fn source(&self) -> Source {
        match self {
            MethodKind::ContainerChunk => Source::ContainerChunk,
            MethodKind::NativeChunk => Source::FormatNativeChunk,
            MethodKind::Xmp => Source::XmpChunk,
            MethodKind::ExifPrimary => Source::ExifPrimary,
            MethodKind::ExifSecondary => Source::ExifSecondary,
            MethodKind::CborScan | MethodKind::PatternScan => Source::BinaryPatternMatch,
        }
    }

    /// Highest confidence this rank may report. Non-increasing in priority order.
    pub fn ceiling(&self) -> u8 {
        match self {
            MethodKind::ContainerChunk => 100,
            MethodKind::NativeChunk => 90,
            MethodKind::Xmp => 80,
            MethodKind::ExifPrimary => 75,
            MethodKind::ExifSecondary => 65,
            MethodKind::CborScan => 60,
            MethodKind::PatternScan => 50,
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes under examination.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub bytes: &'a [u8],
    pub format: Option<ImageFormat>,
}

impl<'a> ExtractionInput<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            format: ImageFormat::sniff(bytes),
        }
    }
}

/// What a single method recovered.
#[derive(Debug, Clone, Default)]
pub struct PartialResult {
    pub manifest: Option<Manifest>,
    pub proof_reference: Option<ProofReference>,
    /// Method's own confidence, before the rank ceiling
    pub confidence: u8,
    /// A signature box or signature block was recovered
    pub signature_present: bool,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub enum MethodOutcome {
    Found(PartialResult),
    /// Provenance data was located but failed validation
    Corrupted(String),
    NotFound,
}

/// One recovery strategy.
pub trait RecoveryMethod: Send + Sync {
    fn kind(&self) -> MethodKind;

    /// Never panics on hostile input; every failure is an outcome.
    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome;
}

/// Result of one extraction call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub manifest: Option<Manifest>,
    pub proof_reference: Option<ProofReference>,
    pub source: Source,
    pub confidence: u8,
    pub integrity: Integrity,
    pub methods_attempted: Vec<MethodKind>,
    pub methods_succeeded: Vec<MethodKind>,
    pub elapsed: Duration,
    pub format: Option<ImageFormat>,
    pub signature_present: bool,
    pub notes: Vec<String>,
}

impl ExtractionResult {
    fn none(format: Option<ImageFormat>, started: Instant) -> Self {
        Self {
            manifest: None,
            proof_reference: None,
            source: Source::None,
            confidence: 0,
            integrity: Integrity::None,
            methods_attempted: Vec::new(),
            methods_succeeded: Vec::new(),
            elapsed: started.elapsed(),
            format,
            signature_present: false,
            notes: Vec::new(),
        }
    }

    /// True when a manifest or a proof reference was recovered.
    pub fn is_found(&self) -> bool {
        self.source != Source::None
    }
}

/// Outcome class reported by [`ExtractionCoordinator::survey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SurveyStatus {
    Found,
    Corrupted,
    NotFound,
}

/// Per-method diagnostic from [`ExtractionCoordinator::survey`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodReport {
    pub method: MethodKind,
    pub status: SurveyStatus,
    /// Capped confidence, zero unless found
    pub confidence: u8,
    pub proof_reference: Option<ProofReference>,
    pub detail: Option<String>,
}

/// Runs recovery methods by priority and scores the result.
pub struct ExtractionCoordinator {
    config: ExtractConfig,
    methods: Vec<Box<dyn RecoveryMethod>>,
}

impl Default for ExtractionCoordinator {
    fn default() -> Self {
        Self::new(ExtractConfig::default())
    }
}

impl fmt::Debug for ExtractionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionCoordinator")
            .field("config", &self.config)
            .field(
                "methods",
                &self.methods.iter().map(|m| m.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ExtractionCoordinator {
    /// Coordinator with the standard seven methods.
    pub fn new(config: ExtractConfig) -> Self {
        let methods: Vec<Box<dyn RecoveryMethod>> = vec![
            Box::new(ContainerChunkMethod),
            Box::new(NativeChunkMethod),
            Box::new(XmpMethod),
            Box::new(ExifPrimaryMethod),
            Box::new(ExifSecondaryMethod),
            Box::new(CborScanMethod::new(config.cbor_scan_max_candidates)),
            Box::new(PatternScanMethod),
        ];
        Self::with_methods(config, methods)
    }

    /// Coordinator with a custom method list. Methods are sorted by rank.
    pub fn with_methods(config: ExtractConfig, mut methods: Vec<Box<dyn RecoveryMethod>>) -> Self {
        methods.sort_by_key(|m| m.kind());
        Self { config, methods }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// Recover provenance from `bytes`. Always returns; `source: none` is the floor.
    #[instrument(level = "debug", skip_all, fields(input_len = bytes.len()))]
    pub fn extract(&self, bytes: &[u8]) -> ExtractionResult {
        let started = Instant::now();
        let input = ExtractionInput::new(bytes);
        let mut result = ExtractionResult::none(input.format, started);

        if bytes.len() > self.config.max_input_bytes {
            result.notes.push(format!(
                "input of {} bytes exceeds limit of {} bytes",
                bytes.len(),
                self.config.max_input_bytes
            ));
            result.elapsed = started.elapsed();
            return result;
        }

        let mut corrupted = false;
        for method in &self.methods {
            let kind = method.kind();
            result.methods_attempted.push(kind);

            match method.attempt(&input) {
                MethodOutcome::Found(partial) => {
                    let confidence = partial.confidence.min(kind.ceiling());
                    let signature_present = partial.signature_present
                        || partial.manifest.as_ref().is_some_and(Manifest::is_signed);

                    result.integrity = if partial.manifest.is_some()
                        && signature_present
                        && confidence >= FULL_INTEGRITY_THRESHOLD
                    {
                        Integrity::Full
                    } else {
                        Integrity::Partial
                    };
                    result.methods_succeeded.push(kind);
                    result.source = kind.source();
                    result.confidence = confidence;
                    result.signature_present = signature_present;
                    result.manifest = partial.manifest;
                    result.proof_reference = partial.proof_reference;
                    result.notes.extend(partial.note);
                    break;
                }
                MethodOutcome::Corrupted(reason) => {
                    debug!(method = %kind, reason = %reason, "Provenance data failed validation");
                    result.notes.push(format!("{kind}: {reason}"));
                    corrupted = true;
                }
                MethodOutcome::NotFound => {}
            }
        }

        if result.source == Source::None && corrupted {
            result.integrity = Integrity::Corrupted;
        }
        result.elapsed = started.elapsed();

        info!(
            source = %result.source,
            confidence = result.confidence,
            integrity = ?result.integrity,
            attempted = result.methods_attempted.len(),
            elapsed_us = result.elapsed.as_micros() as u64,
            "Extraction complete"
        );
        result
    }

    /// Run every method independently and report each outcome.
    #[instrument(level = "debug", skip_all, fields(input_len = bytes.len()))]
    pub fn survey(&self, bytes: &[u8]) -> Vec<MethodReport> {
        if bytes.len() > self.config.max_input_bytes {
            return Vec::new();
        }
        let input = ExtractionInput::new(bytes);

        self.methods
            .iter()
            .map(|method| {
                let kind = method.kind();
                match method.attempt(&input) {
                    MethodOutcome::Found(partial) => MethodReport {
                        method: kind,
                        status: SurveyStatus::Found,
                        confidence: partial.confidence.min(kind.ceiling()),
                        proof_reference: partial.proof_reference,
                        detail: partial.note,
                    },
                    MethodOutcome::Corrupted(reason) => MethodReport {
                        method: kind,
                        status: SurveyStatus::Corrupted,
                        confidence: 0,
                        proof_reference: None,
                        detail: Some(reason),
                    },
                    MethodOutcome::NotFound => MethodReport {
                        method: kind,
                        status: SurveyStatus::NotFound,
                        confidence: 0,
                        proof_reference: None,
                        detail: None,
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(MethodKind, fn() -> MethodOutcome);

    impl RecoveryMethod for Fixed {
        fn kind(&self) -> MethodKind {
            self.0
        }

        fn attempt(&self, _input: &ExtractionInput<'_>) -> MethodOutcome {
            (self.1)()
        }
    }

    fn proof_only() -> MethodOutcome {
        MethodOutcome::Found(PartialResult {
            proof_reference: ProofReference::parse("https://proofs.example/abc123").ok(),
            confidence: 99,
            ..Default::default()
        })
    }

    fn corrupted() -> MethodOutcome {
        MethodOutcome::Corrupted("CRC mismatch".into())
    }

    fn signed() -> MethodOutcome {
        MethodOutcome::Found(PartialResult {
            manifest: Some(Manifest::new("test")),
            confidence: 100,
            signature_present: true,
            ..Default::default()
        })
    }

    #[test]
    fn test_ceilings_are_monotonic() {
        let kinds = [
            MethodKind::ContainerChunk,
            MethodKind::NativeChunk,
            MethodKind::Xmp,
            MethodKind::ExifPrimary,
            MethodKind::ExifSecondary,
            MethodKind::CborScan,
            MethodKind::PatternScan,
        ];
        assert!(kinds.windows(2).all(|w| w[0].ceiling() >= w[1].ceiling()));
        assert!(kinds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_first_success_wins_and_is_capped() {
        let coordinator = ExtractionCoordinator::with_methods(
            ExtractConfig::default(),
            vec![
                Box::new(Fixed(MethodKind::ExifPrimary, proof_only)),
                Box::new(Fixed(MethodKind::ContainerChunk, corrupted)),
            ],
        );
        let result = coordinator.extract(b"anything");
        assert_eq!(
            result.methods_attempted,
            vec![MethodKind::ContainerChunk, MethodKind::ExifPrimary]
        );
        assert_eq!(result.methods_succeeded, vec![MethodKind::ExifPrimary]);
        assert_eq!(result.source, Source::ExifPrimary);
        assert_eq!(result.confidence, 75);
        assert_eq!(result.integrity, Integrity::Partial);
        assert_eq!(result.notes, vec!["container-chunk: CRC mismatch".to_string()]);
    }

    #[test]
    fn test_full_integrity() {
        let coordinator = ExtractionCoordinator::with_methods(
            ExtractConfig::default(),
            vec![Box::new(Fixed(MethodKind::ContainerChunk, signed))],
        );
        let result = coordinator.extract(b"x");
        assert_eq!(result.integrity, Integrity::Full);
        assert!(result.signature_present);

        // same payload from a low-ranked method is only partial
        let coordinator = ExtractionCoordinator::with_methods(
            ExtractConfig::default(),
            vec![Box::new(Fixed(MethodKind::CborScan, signed))],
        );
        let result = coordinator.extract(b"x");
        assert_eq!(result.confidence, 60);
        assert_eq!(result.integrity, Integrity::Partial);
        assert_eq!(result.source, Source::BinaryPatternMatch);
    }

    #[test]
    fn test_corrupted_when_nothing_recovered() {
        let coordinator = ExtractionCoordinator::with_methods(
            ExtractConfig::default(),
            vec![Box::new(Fixed(MethodKind::NativeChunk, corrupted))],
        );
        let result = coordinator.extract(b"x");
        assert_eq!(result.source, Source::None);
        assert_eq!(result.confidence, 0);
        assert_eq!(result.integrity, Integrity::Corrupted);
    }

    #[test]
    fn test_oversized_input() {
        let coordinator = ExtractionCoordinator::new(ExtractConfig {
            max_input_bytes: 4,
            ..Default::default()
        });
        let result = coordinator.extract(b"too large");
        assert_eq!(result.source, Source::None);
        assert_eq!(result.integrity, Integrity::None);
        assert!(result.methods_attempted.is_empty());
        assert_eq!(result.notes.len(), 1);
        assert!(coordinator.survey(b"too large").is_empty());
    }

    #[test]
    fn test_result_serializes_kebab_source() {
        let result = ExtractionCoordinator::default().extract(b"");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["source"], "none");
        assert_eq!(json["integrity"], "none");
        assert_eq!(json["methodsAttempted"].as_array().unwrap().len(), 7);
    }
}
