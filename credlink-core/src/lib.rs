//! CredLink Core - content credentials that survive image pipelines
//!
//! This crate embeds a provenance [`Manifest`] into JPEG, PNG and WebP bytes
//! through several redundant channels, recovers it again after the image has
//! been re-saved or partially stripped, and validates the certificate chain
//! of the identity that signed it.
//!
//! # Features
//!
//! - Box-structured container codec for the manifest, signature and proof reference
//! - Redundant embedding: EXIF fields, an XMP packet and format-native chunks
//! - Prioritized recovery with per-method confidence ceilings
//! - Certificate chain validation with swappable trust anchors and a
//!   pluggable revocation oracle
//! - Bounded parallel batch extraction
//!
//! # Example
//!
//! ```no_run
//! use credlink_core::{embed, extract, Integrity, Manifest, ProofReference};
//!
//! # fn example(png: &[u8]) -> credlink_core::Result<()> {
//! let manifest = Manifest::new("camera-app/2.1");
//! let proof = ProofReference::parse("https://proofs.example/abc123")?;
//!
//! let embedded = embed(png, &manifest, &proof, None);
//! let recovered = extract(&embedded.image_bytes);
//!
//! assert_eq!(recovered.proof_reference.as_ref(), Some(&proof));
//! assert_ne!(recovered.integrity, Integrity::None);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod chain;
pub mod config;
pub mod container;
pub mod embed;
pub mod error;
pub mod extract;
pub mod format;
pub mod manifest;

// Re-export main types for convenience
pub use batch::{extract_batch, extract_batch_with};
pub use chain::{
    CertificateInfo, CertificateValidationResult, ChainChecks, ChainRejection,
    NoRevocationOracle, RevocationOracle, RevocationStatus, SnapshotRevocationOracle, Stage,
    TrustAnchorSet, TrustStore,
};
pub use config::{CoreConfig, EmbedConfig, ExtractConfig, ValidationOptions};
pub use container::{ContainerError, ContainerTree};
pub use embed::{EmbedStrategy, Embedder, EmbeddingResult};
pub use error::{CredlinkError, Result, DEFAULT_MAX_INPUT_BYTES};
pub use extract::{
    ExtractionCoordinator, ExtractionResult, Integrity, MethodKind, MethodReport, RecoveryMethod,
    Source,
};
pub use format::ImageFormat;
pub use manifest::{Assertion, Manifest, ProofReference, SignatureBlock};

/// Embed with the default [`EmbedConfig`].
pub fn embed(
    image: &[u8],
    manifest: &Manifest,
    proof: &ProofReference,
    signature: Option<&[u8]>,
) -> EmbeddingResult {
    Embedder::default().embed(image, manifest, proof, signature)
}

/// Extract with the default [`ExtractConfig`].
pub fn extract(image: &[u8]) -> ExtractionResult {
    ExtractionCoordinator::default().extract(image)
}

/// Validate a leaf-first DER chain. See [`chain::validate_chain`].
///
/// Must be polled inside a Tokio runtime with the time driver enabled.
pub async fn validate_chain<B: AsRef<[u8]>>(
    chain: &[B],
    anchors: &TrustAnchorSet,
    oracle: &dyn RevocationOracle,
    options: &ValidationOptions,
) -> CertificateValidationResult {
    chain::validate_chain(chain, anchors, oracle, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn tiny_png() -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(1, 1, Rgb([200, 10, 10]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// Integration test: embed into a 1x1 PNG, then recover from the container chunk.
    #[test]
    fn test_fresh_sign_verify() {
        let manifest = Manifest::new("test");
        let proof = ProofReference::parse("https://proofs.example/abc123").unwrap();

        let embedded = embed(&tiny_png(), &manifest, &proof, None);
        assert!(embedded.is_embedded(), "{:?}", embedded.warnings);

        let result = extract(&embedded.image_bytes);
        assert_eq!(result.source, Source::ContainerChunk);
        assert_eq!(result.confidence, 100);
        assert_eq!(result.proof_reference, Some(proof));
        assert_eq!(result.manifest.map(|m| m.generator), Some("test".to_string()));
    }

    #[test]
    fn test_non_image_reads_as_not_found() {
        let result = extract(b"definitely not an image");
        assert_eq!(result.integrity, Integrity::None);
        assert!(!result.is_found());
    }
}
