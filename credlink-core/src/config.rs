//! Core configuration
//!
//! Loads embedding, extraction and validation settings from environment
//! variables with sensible defaults. Every section can also be built by hand
//! and passed to the components directly.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::embed::EmbedStrategy;
use crate::error::DEFAULT_MAX_INPUT_BYTES;

/// Settings for [`crate::embed::Embedder`].
#[derive(Debug, Clone)]
pub struct EmbedConfig {
    /// Channels to attempt (default: all of them)
    pub strategies: BTreeSet<EmbedStrategy>,
    /// Decode every intermediate result and roll back channels that break it (default: true)
    pub verify_decodability: bool,
    /// Largest CBOR manifest copied verbatim into the XMP packet (default: 64 KiB)
    pub xmp_manifest_limit_bytes: usize,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            strategies: EmbedStrategy::ALL.into_iter().collect(),
            verify_decodability: true,
            xmp_manifest_limit_bytes: 64 * 1024,
        }
    }
}

/// Settings for [`crate::extract::ExtractionCoordinator`].
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Inputs above this size are refused without running any method (default: 64 MiB)
    pub max_input_bytes: usize,
    /// Maximum number of CBOR candidates decoded by the signature-byte scan (default: 16)
    pub cbor_scan_max_candidates: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            cbor_scan_max_candidates: 16,
        }
    }
}

/// Settings for [`crate::chain::validate_chain`].
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Reject when revocation status cannot be determined (default: false, soft-fail)
    pub strict_revocation: bool,
    /// Outer bound on each revocation oracle call (default: 3s)
    pub revocation_timeout: Duration,
    /// Validation instant; `None` means "now"
    pub at: Option<DateTime<Utc>>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            strict_revocation: false,
            revocation_timeout: Duration::from_millis(3000),
            at: None,
        }
    }
}

/// Complete core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub embed: EmbedConfig,
    pub extract: ExtractConfig,
    pub validation: ValidationOptions,
    /// Worker pool size used by [`crate::batch::extract_batch_with`] (default: 4)
    pub batch_concurrency: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            embed: EmbedConfig::default(),
            extract: ExtractConfig::default(),
            validation: ValidationOptions::default(),
            batch_concurrency: 4,
        }
    }
}

impl CoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let strategies = std::env::var("CREDLINK_EMBED_STRATEGIES")
            .ok()
            .map(|list| parse_strategies(&list))
            .filter(|set| !set.is_empty())
            .unwrap_or(defaults.embed.strategies);

        let verify_decodability = std::env::var("CREDLINK_VERIFY_DECODABILITY")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(defaults.embed.verify_decodability);

        let xmp_manifest_limit_bytes = env_parse("CREDLINK_XMP_MANIFEST_LIMIT_BYTES")
            .unwrap_or(defaults.embed.xmp_manifest_limit_bytes);

        let max_input_bytes = env_parse::<usize>("CREDLINK_MAX_INPUT_MB")
            .map(|mb| mb.saturating_mul(1024 * 1024))
            .unwrap_or(defaults.extract.max_input_bytes);

        let cbor_scan_max_candidates = env_parse("CREDLINK_PATTERN_SCAN_LIMIT")
            .unwrap_or(defaults.extract.cbor_scan_max_candidates);

        // Soft-fail unless explicitly opted in
        let strict_revocation = std::env::var("CREDLINK_STRICT_REVOCATION")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let revocation_timeout = env_parse::<u64>("CREDLINK_REVOCATION_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.validation.revocation_timeout);

        let batch_concurrency = env_parse::<usize>("CREDLINK_BATCH_CONCURRENCY")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.batch_concurrency);

        Self {
            embed: EmbedConfig {
                strategies,
                verify_decodability,
                xmp_manifest_limit_bytes,
            },
            extract: ExtractConfig {
                max_input_bytes,
                cbor_scan_max_candidates,
            },
            validation: ValidationOptions {
                strict_revocation,
                revocation_timeout,
                at: None,
            },
            batch_concurrency,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_strategies(list: &str) -> BTreeSet<EmbedStrategy> {
    list.split(',')
        .filter_map(|s| match s.trim().to_lowercase().as_str() {
            "exif" => Some(EmbedStrategy::Exif),
            "xmp" | "xmp-chunk" | "xmpchunk" => Some(EmbedStrategy::XmpChunk),
            "container" | "container-chunk" | "containerchunk" => {
                Some(EmbedStrategy::ContainerChunk)
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_soft_fail_revocation() {
        let config = CoreConfig::default();
        assert!(!config.validation.strict_revocation);
        assert_eq!(config.embed.strategies.len(), 3);
        assert!(config.embed.verify_decodability);
        assert_eq!(config.batch_concurrency, 4);
    }

    #[test]
    fn test_parse_strategies() {
        let set = parse_strategies("exif, container ,bogus");
        assert!(set.contains(&EmbedStrategy::Exif));
        assert!(set.contains(&EmbedStrategy::ContainerChunk));
        assert!(!set.contains(&EmbedStrategy::XmpChunk));
        assert!(parse_strategies("nothing,useful").is_empty());
    }
}
