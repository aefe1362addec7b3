//! The standard recovery methods, highest priority first.

use tracing::debug;

use super::{ExtractionInput, MethodKind, MethodOutcome, PartialResult, RecoveryMethod};
use crate::container;
use crate::format::exif::{self, Ifd0};
use crate::format::{jpeg, png, webp, xmp, ImageFormat, NativeRecord};
use crate::manifest::{Manifest, ProofReference};

/// CBOR text string header (major type 3, length 9) followed by "generator".
const MANIFEST_NEEDLE: &[u8] = b"\x69generator";

/// Upper bound on URL candidates examined by the pattern scan.
const MAX_PATTERN_CANDIDATES: usize = 256;

fn found(
    manifest: Option<Manifest>,
    proof_reference: Option<ProofReference>,
    confidence: u8,
    signature_present: bool,
) -> MethodOutcome {
    MethodOutcome::Found(PartialResult {
        manifest,
        proof_reference,
        confidence,
        signature_present,
        note: None,
    })
}

/// Binary container chunk: PNG `caBX`, WebP `C2PA`, JPEG APP11 JUMBF.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerChunkMethod;

impl ContainerChunkMethod {
    fn locate(input: &ExtractionInput<'_>) -> Result<Option<Vec<u8>>, String> {
        match input.format {
            Some(ImageFormat::Png) => {
                let Some(parsed) = png::read_chunks(input.bytes) else {
                    return Ok(None);
                };
                match (parsed.find(png::CONTAINER), parsed.error.as_ref()) {
                    (Some(chunk), _) if !chunk.crc_ok() => {
                        Err(format!("{} CRC mismatch", String::from_utf8_lossy(&png::CONTAINER)))
                    }
                    (Some(chunk), _) => Ok(Some(chunk.data.to_vec())),
                    (None, Some(e)) => Err(format!("PNG chunk walk stopped: {e}")),
                    (None, None) => Ok(None),
                }
            }
            Some(ImageFormat::Webp) => {
                let Some(parsed) = webp::read_chunks(input.bytes) else {
                    return Ok(None);
                };
                match (parsed.find(webp::CONTAINER), parsed.error.as_ref()) {
                    (Some(chunk), _) => Ok(Some(chunk.data.to_vec())),
                    (None, Some(e)) => Err(format!("WebP chunk walk stopped: {e}")),
                    (None, None) => Ok(None),
                }
            }
            Some(ImageFormat::Jpeg) => Ok(jpeg::read_jumbf(input.bytes)),
            None => Ok(None),
        }
    }
}

impl RecoveryMethod for ContainerChunkMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::ContainerChunk
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        let bytes = match Self::locate(input) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return MethodOutcome::NotFound,
            Err(reason) => return MethodOutcome::Corrupted(reason),
        };

        match container::decode_manifest(&bytes) {
            Ok(decoded) => {
                let signed = decoded.signature.is_some() || decoded.manifest.is_signed();
                found(Some(decoded.manifest), decoded.proof_reference, 100, signed)
            }
            Err(e) => MethodOutcome::Corrupted(format!("container invalid: {e}")),
        }
    }
}

/// Format-native CBOR record: PNG `crLk` (90), WebP `CRLK` (85).
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeChunkMethod;

impl RecoveryMethod for NativeChunkMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::NativeChunk
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        let (data, confidence) = match input.format {
            Some(ImageFormat::Png) => {
                let Some(parsed) = png::read_chunks(input.bytes) else {
                    return MethodOutcome::NotFound;
                };
                match parsed.find(png::NATIVE) {
                    Some(chunk) if !chunk.crc_ok() => {
                        return MethodOutcome::Corrupted(format!(
                            "{} CRC mismatch",
                            String::from_utf8_lossy(&png::NATIVE)
                        ))
                    }
                    Some(chunk) => (chunk.data.to_vec(), 90),
                    None => return MethodOutcome::NotFound,
                }
            }
            Some(ImageFormat::Webp) => {
                match webp::read_chunks(input.bytes)
                    .and_then(|p| p.find(webp::NATIVE).map(|c| c.data.to_vec()))
                {
                    Some(data) => (data, 85),
                    None => return MethodOutcome::NotFound,
                }
            }
            _ => return MethodOutcome::NotFound,
        };

        match NativeRecord::from_cbor(&data) {
            Ok(record) if record.manifest.is_some() || record.proof_reference.is_some() => {
                let signed = record.manifest.as_ref().is_some_and(Manifest::is_signed);
                found(record.manifest, record.proof_reference, confidence, signed)
            }
            Ok(_) => MethodOutcome::Corrupted("native record is empty".into()),
            Err(e) => MethodOutcome::Corrupted(format!("native record undecodable: {e}")),
        }
    }
}

/// XMP packet in the provenance namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmpMethod;

impl RecoveryMethod for XmpMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::Xmp
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        let packet = match input.format {
            Some(ImageFormat::Png) => match png::read_xmp(input.bytes) {
                Some(Ok(packet)) => Some(packet),
                Some(Err(e)) => return MethodOutcome::Corrupted(e.to_string()),
                None => None,
            },
            Some(ImageFormat::Webp) => webp::read_xmp(input.bytes),
            Some(ImageFormat::Jpeg) => jpeg::read_xmp(input.bytes),
            None => None,
        };
        let Some(provenance) = packet.as_deref().and_then(xmp::read_provenance) else {
            return MethodOutcome::NotFound;
        };

        let proof = provenance.proof_reference();
        let (manifest, note) = match provenance.decode_manifest() {
            Ok(manifest) => (manifest, None),
            Err(e) => (None, Some(format!("xmp manifest discarded: {e}"))),
        };

        if manifest.is_none() && proof.is_none() {
            return MethodOutcome::Corrupted(
                note.unwrap_or_else(|| "xmp provenance values unusable".into()),
            );
        }

        let confidence = if manifest.is_some() { 80 } else { 75 };
        let signed = manifest.as_ref().is_some_and(Manifest::is_signed);
        MethodOutcome::Found(PartialResult {
            manifest,
            proof_reference: proof,
            confidence,
            signature_present: signed,
            note,
        })
    }
}

/// TIFF payload of the image's EXIF block, if any.
fn exif_ifd(input: &ExtractionInput<'_>) -> Result<Option<Ifd0>, String> {
    let tiff = match input.format {
        Some(ImageFormat::Jpeg) => jpeg::read_exif(input.bytes),
        Some(ImageFormat::Webp) => webp::read_exif(input.bytes),
        Some(ImageFormat::Png) => {
            let Some(parsed) = png::read_chunks(input.bytes) else {
                return Ok(None);
            };
            match parsed.find(png::EXIF) {
                Some(chunk) if !chunk.crc_ok() => return Err("eXIf CRC mismatch".into()),
                Some(chunk) => Some(exif::strip_exif_header(chunk.data).to_vec()),
                None => None,
            }
        }
        None => None,
    };

    match tiff {
        Some(tiff) => Ifd0::parse(&tiff)
            .map(Some)
            .map_err(|e| format!("EXIF unreadable: {e}")),
        None => Ok(None),
    }
}

/// EXIF ImageDescription holding the proof URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifPrimaryMethod;

impl RecoveryMethod for ExifPrimaryMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::ExifPrimary
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        match exif_ifd(input) {
            Ok(Some(ifd)) => match exif::primary_proof(&ifd) {
                Some(proof) => found(None, Some(proof), 85, false),
                None => MethodOutcome::NotFound,
            },
            Ok(None) => MethodOutcome::NotFound,
            Err(reason) => MethodOutcome::Corrupted(reason),
        }
    }
}

/// EXIF Artist marker and other ASCII fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifSecondaryMethod;

impl RecoveryMethod for ExifSecondaryMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::ExifSecondary
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        // a corrupted block was already reported by the primary method
        match exif_ifd(input) {
            Ok(Some(ifd)) => match exif::secondary_proof(&ifd) {
                Some(proof) => found(None, Some(proof), 65, false),
                None => MethodOutcome::NotFound,
            },
            _ => MethodOutcome::NotFound,
        }
    }
}

/// Manifest CBOR located anywhere in the file by its leading `generator` key.
#[derive(Debug, Clone, Copy)]
pub struct CborScanMethod {
    max_candidates: usize,
}

impl CborScanMethod {
    pub fn new(max_candidates: usize) -> Self {
        Self { max_candidates }
    }
}

impl Default for CborScanMethod {
    fn default() -> Self {
        Self::new(16)
    }
}

impl RecoveryMethod for CborScanMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::CborScan
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        let bytes = input.bytes;
        let candidates = bytes
            .windows(MANIFEST_NEEDLE.len())
            .enumerate()
            .filter(|(i, window)| {
                *i > 0 && *window == MANIFEST_NEEDLE && (0xA1..=0xB7).contains(&bytes[i - 1])
            })
            .map(|(i, _)| i - 1)
            .take(self.max_candidates);

        for start in candidates {
            match ciborium::from_reader::<Manifest, _>(&bytes[start..]) {
                Ok(manifest) => {
                    debug!(offset = start, "Manifest CBOR recovered by scan");
                    let signed = manifest.is_signed();
                    return MethodOutcome::Found(PartialResult {
                        manifest: Some(manifest),
                        proof_reference: scan_proof_reference(bytes),
                        confidence: 75,
                        signature_present: signed,
                        note: Some(format!("manifest CBOR found at offset {start}")),
                    });
                }
                Err(e) => debug!(offset = start, error = %e, "CBOR candidate rejected"),
            }
        }
        MethodOutcome::NotFound
    }
}

/// Raw scan for anything shaped like a proof URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternScanMethod;

impl RecoveryMethod for PatternScanMethod {
    fn kind(&self) -> MethodKind {
        MethodKind::PatternScan
    }

    fn attempt(&self, input: &ExtractionInput<'_>) -> MethodOutcome {
        match scan_proof_reference(input.bytes) {
            Some(proof) => found(None, Some(proof), 50, false),
            None => MethodOutcome::NotFound,
        }
    }
}

fn is_url_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-._~:/?#[]@!$&'()*+,;=%".contains(&b)
}

/// First `https://` run in `bytes` that parses as a proof reference. Bare
/// namespace-like URIs ending in `/` or `#` are skipped.
pub(crate) fn scan_proof_reference(bytes: &[u8]) -> Option<ProofReference> {
    const SCHEME: &[u8] = b"https://";

    bytes
        .windows(SCHEME.len())
        .enumerate()
        .filter(|(_, window)| *window == SCHEME)
        .take(MAX_PATTERN_CANDIDATES)
        .find_map(|(start, _)| {
            let len = bytes[start..]
                .iter()
                .take_while(|b| is_url_byte(**b))
                .count();
            let candidate = std::str::from_utf8(&bytes[start..start + len]).ok()?;
            let candidate = candidate.trim_end_matches(['.', ',', ';', ')', '\'']);
            if candidate.ends_with('/') || candidate.ends_with('#') {
                return None;
            }
            ProofReference::parse(candidate).ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_proof_reference() {
        let blob = b"\x00\x01junk https://proofs.example/abc123\x00more";
        assert_eq!(
            scan_proof_reference(blob).unwrap(),
            "https://proofs.example/abc123"
        );

        // namespace URIs are not proofs
        let blob = b"xmlns:credlink=\"https://credlink.io/ns/provenance/1.0/\" https://p.example/x";
        assert_eq!(scan_proof_reference(blob).unwrap(), "https://p.example/x");

        assert!(scan_proof_reference(b"https://").is_none());
        assert!(scan_proof_reference(b"").is_none());
    }

    #[test]
    fn test_cbor_scan_finds_embedded_manifest() {
        let manifest = Manifest::new("scan-test");
        let mut blob = vec![0u8; 17];
        blob.extend_from_slice(&manifest.to_cbor().unwrap());
        blob.extend_from_slice(&[0xFF; 9]);

        let input = ExtractionInput::new(&blob);
        match CborScanMethod::default().attempt(&input) {
            MethodOutcome::Found(partial) => {
                assert_eq!(partial.manifest, Some(manifest));
                assert!(partial.proof_reference.is_none());
            }
            other => panic!("expected manifest, got {other:?}"),
        }
    }

    #[test]
    fn test_cbor_scan_candidate_cap() {
        let manifest = Manifest::new("scan-test");
        // a decoy map header with broken content comes first
        let mut blob = vec![0xA2];
        blob.extend_from_slice(MANIFEST_NEEDLE);
        blob.push(0xFF);
        blob.extend_from_slice(&manifest.to_cbor().unwrap());

        let input = ExtractionInput::new(&blob);
        assert!(matches!(
            CborScanMethod::new(1).attempt(&input),
            MethodOutcome::NotFound
        ));
        assert!(matches!(
            CborScanMethod::new(2).attempt(&input),
            MethodOutcome::Found(_)
        ));
    }

    #[test]
    fn test_methods_ignore_unknown_format() {
        let input = ExtractionInput::new(b"plain text");
        assert!(input.format.is_none());
        let methods: [&dyn RecoveryMethod; 5] = [
            &ContainerChunkMethod,
            &NativeChunkMethod,
            &XmpMethod,
            &ExifPrimaryMethod,
            &ExifSecondaryMethod,
        ];
        for method in methods {
            assert!(matches!(method.attempt(&input), MethodOutcome::NotFound));
        }
    }
}
