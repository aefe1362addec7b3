//! Redundant multi-channel manifest embedding
//!
//! Each [`EmbedStrategy`] is a channel that can carry the provenance link
//! independently of the others. Channels are applied one after another; a
//! channel that fails, or whose output no longer decodes to an image of the
//! same format and size, is rolled back while earlier channels stay in place.
//!
//! | Format | Exif | XmpChunk | ContainerChunk |
//! |--------|------|----------|----------------|
//! | JPEG   | APP1 IFD0 | - | - |
//! | PNG    | `eXIf` | `iTXt` | `caBX` + `crLk` |
//! | WebP   | `EXIF` | `XMP ` | `C2PA` + `CRLK` |

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::EmbedConfig;
use crate::container;
use crate::error::{CredlinkError, Result};
use crate::format::exif::{self, ProvenanceFields};
use crate::format::{self, jpeg, png, webp, xmp, ImageFormat, NativeRecord};
use crate::manifest::{signature_summary, Manifest, ProofReference};

/// An embedding channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmbedStrategy {
    /// Proof reference in EXIF descriptive fields
    Exif,
    /// XMP packet chunk
    XmpChunk,
    /// Binary container chunk plus the format-native record
    ContainerChunk,
}

impl EmbedStrategy {
    /// All channels, in application order.
    pub const ALL: [EmbedStrategy; 3] = [Self::Exif, Self::XmpChunk, Self::ContainerChunk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exif => "exif",
            Self::XmpChunk => "xmpChunk",
            Self::ContainerChunk => "containerChunk",
        }
    }

    /// Whether this channel exists for `format`.
    pub fn applies_to(&self, format: ImageFormat) -> bool {
        !matches!(
            (self, format),
            (Self::XmpChunk | Self::ContainerChunk, ImageFormat::Jpeg)
        )
    }
}

impl fmt::Display for EmbedStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one embed call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingResult {
    #[serde(skip)]
    pub image_bytes: Vec<u8>,
    pub strategies_applied: BTreeSet<EmbedStrategy>,
    pub warnings: Vec<String>,
    pub format: Option<ImageFormat>,
}

impl EmbeddingResult {
    fn unchanged(image: &[u8], format: Option<ImageFormat>, warning: String) -> Self {
        warn!(warning = %warning, "Embedding skipped, returning original bytes");
        Self {
            image_bytes: image.to_vec(),
            strategies_applied: BTreeSet::new(),
            warnings: vec![warning],
            format,
        }
    }

    /// True when at least one channel carries the manifest.
    pub fn is_embedded(&self) -> bool {
        !self.strategies_applied.is_empty()
    }
}

/// Per-call values shared by every channel.
struct Payloads<'a> {
    manifest: &'a Manifest,
    proof: &'a ProofReference,
    manifest_cbor: Vec<u8>,
    container: Vec<u8>,
    native: Vec<u8>,
    summary: String,
}

/// Writes a manifest into image bytes through every configured channel.
#[derive(Debug, Clone, Default)]
pub struct Embedder {
    config: EmbedConfig,
}

impl Embedder {
    pub fn new(config: EmbedConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    /// Embed `manifest` and `proof` into `image`.
    ///
    /// Never fails: problems are reported as warnings and, in the worst case,
    /// the original bytes come back untouched.
    #[instrument(level = "debug", skip_all, fields(input_len = image.len(), proof = %proof))]
    pub fn embed(
        &self,
        image: &[u8],
        manifest: &Manifest,
        proof: &ProofReference,
        signature: Option<&[u8]>,
    ) -> EmbeddingResult {
        let Some(format) = ImageFormat::sniff(image) else {
            return EmbeddingResult::unchanged(image, None, "unsupported image format".into());
        };

        let original_dims = match self.dimensions(image, format) {
            Ok(dims) => dims,
            Err(e) => {
                return EmbeddingResult::unchanged(
                    image,
                    Some(format),
                    format!("input does not decode as {format}: {e}"),
                )
            }
        };

        let payloads = match Self::payloads(manifest, proof, signature) {
            Ok(p) => p,
            Err(e) => {
                return EmbeddingResult::unchanged(
                    image,
                    Some(format),
                    format!("manifest serialization failed: {e}"),
                )
            }
        };

        let mut current = image.to_vec();
        let mut applied = BTreeSet::new();
        let mut warnings = Vec::new();

        for strategy in EmbedStrategy::ALL {
            if !self.config.strategies.contains(&strategy) {
                continue;
            }
            if !strategy.applies_to(format) {
                debug!(%strategy, %format, "Channel not available for format");
                continue;
            }

            let candidate = match self.apply(strategy, format, &current, original_dims, &payloads) {
                Ok((bytes, notes)) => {
                    warnings.extend(notes);
                    bytes
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "Channel failed, continuing with others");
                    warnings.push(format!("{strategy} embedding failed: {e}"));
                    continue;
                }
            };

            if self.config.verify_decodability {
                match format::decode_dimensions(&candidate, format) {
                    Ok(dims) if dims == original_dims => {}
                    Ok(dims) => {
                        warnings.push(format!(
                            "{strategy} rolled back: dimensions changed from {:?} to {:?}",
                            original_dims, dims
                        ));
                        continue;
                    }
                    Err(e) => {
                        warn!(%strategy, error = %e, "Channel output failed to decode, rolling back");
                        warnings.push(format!("{strategy} rolled back: output does not decode: {e}"));
                        continue;
                    }
                }
            }

            current = candidate;
            applied.insert(strategy);
        }

        if applied.is_empty() {
            warnings.push("no embedding channel succeeded".into());
            current = image.to_vec();
        }

        info!(
            format = %format,
            applied = applied.len(),
            warnings = warnings.len(),
            output_len = current.len(),
            "Embedding complete"
        );

        EmbeddingResult {
            image_bytes: current,
            strategies_applied: applied,
            warnings,
            format: Some(format),
        }
    }

    fn dimensions(&self, image: &[u8], format: ImageFormat) -> Result<(u32, u32)> {
        if self.config.verify_decodability {
            format::decode_dimensions(image, format)
        } else {
            format::probe_dimensions(image, format)
        }
    }

    fn payloads<'a>(
        manifest: &'a Manifest,
        proof: &'a ProofReference,
        signature: Option<&[u8]>,
    ) -> Result<Payloads<'a>> {
        let signature = signature.filter(|s| !s.is_empty()).or_else(|| {
            manifest
                .signature
                .as_ref()
                .map(|s| s.signature.as_slice())
                .filter(|s| !s.is_empty())
        });

        Ok(Payloads {
            manifest,
            proof,
            manifest_cbor: manifest.to_cbor()?,
            container: container::encode_manifest(manifest, Some(proof), signature)?,
            native: NativeRecord::new(manifest, proof).to_cbor()?,
            summary: signature_summary(manifest, signature),
        })
    }

    /// Apply one channel to `current`, returning the new bytes plus warnings.
    fn apply(
        &self,
        strategy: EmbedStrategy,
        format: ImageFormat,
        current: &[u8],
        canvas: (u32, u32),
        payloads: &Payloads<'_>,
    ) -> Result<(Vec<u8>, Vec<String>)> {
        match strategy {
            EmbedStrategy::Exif => Self::apply_exif(format, current, canvas, payloads),
            EmbedStrategy::XmpChunk => {
                let packet = xmp::build_packet(
                    payloads.proof,
                    &payloads.manifest_cbor,
                    self.config.xmp_manifest_limit_bytes,
                );
                let bytes = match format {
                    ImageFormat::Png => {
                        let data = png::itxt_payload(png::XMP_KEYWORD, &packet);
                        png::replace_chunk(current, png::ITXT, &data, png::Placement::BeforeEnd)?
                    }
                    ImageFormat::Webp => {
                        webp::replace_chunk(current, webp::XMP, packet.as_bytes(), canvas)?
                    }
                    ImageFormat::Jpeg => return Err(CredlinkError::UnsupportedFormat),
                };
                Ok((bytes, Vec::new()))
            }
            EmbedStrategy::ContainerChunk => {
                let bytes = match format {
                    ImageFormat::Png => {
                        let with_box = png::replace_chunk(
                            current,
                            png::CONTAINER,
                            &payloads.container,
                            png::Placement::BeforeEnd,
                        )?;
                        png::replace_chunk(
                            &with_box,
                            png::NATIVE,
                            &payloads.native,
                            png::Placement::BeforeEnd,
                        )?
                    }
                    ImageFormat::Webp => {
                        let with_box =
                            webp::replace_chunk(current, webp::CONTAINER, &payloads.container, canvas)?;
                        webp::replace_chunk(&with_box, webp::NATIVE, &payloads.native, canvas)?
                    }
                    ImageFormat::Jpeg => return Err(CredlinkError::UnsupportedFormat),
                };
                Ok((bytes, Vec::new()))
            }
        }
    }

    fn apply_exif(
        format: ImageFormat,
        current: &[u8],
        canvas: (u32, u32),
        payloads: &Payloads<'_>,
    ) -> Result<(Vec<u8>, Vec<String>)> {
        let existing = match format {
            ImageFormat::Jpeg => jpeg::read_exif(current),
            ImageFormat::Png => png::read_chunks(current)
                .and_then(|parsed| parsed.find(png::EXIF).map(|c| c.data))
                .map(|data| exif::strip_exif_header(data).to_vec()),
            ImageFormat::Webp => webp::read_exif(current),
        };

        let fields = ProvenanceFields {
            proof: payloads.proof,
            generator: &payloads.manifest.generator,
            signature_summary: &payloads.summary,
        };
        let (tiff, warnings) = exif::merge_provenance(existing.as_deref(), &fields)?;

        let bytes = match format {
            ImageFormat::Jpeg => jpeg::replace_exif(current, &tiff)?,
            ImageFormat::Png => {
                png::replace_chunk(current, png::EXIF, &tiff, png::Placement::AfterHeader)?
            }
            ImageFormat::Webp => webp::replace_chunk(current, webp::EXIF, &tiff, canvas)?,
        };
        Ok((bytes, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{DynamicImage, RgbImage};

    fn encode(format: image::ImageFormat, width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10])));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).expect("encode");
        out.into_inner()
    }

    fn proof() -> ProofReference {
        ProofReference::parse("https://proofs.example/abc123").unwrap()
    }

    #[test]
    fn test_png_all_channels() {
        let image = encode(image::ImageFormat::Png, 4, 3);
        let result = Embedder::default().embed(&image, &Manifest::new("test"), &proof(), None);

        assert_eq!(result.format, Some(ImageFormat::Png));
        assert_eq!(result.strategies_applied.len(), 3);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
        assert_eq!(
            format::decode_dimensions(&result.image_bytes, ImageFormat::Png).unwrap(),
            (4, 3)
        );
    }

    #[test]
    fn test_jpeg_exif_only() {
        let image = encode(image::ImageFormat::Jpeg, 8, 8);
        let result = Embedder::default().embed(&image, &Manifest::new("test"), &proof(), None);

        assert_eq!(
            result.strategies_applied,
            BTreeSet::from([EmbedStrategy::Exif])
        );
        let tiff = jpeg::read_exif(&result.image_bytes).unwrap();
        let ifd = exif::Ifd0::parse(&tiff).unwrap();
        assert_eq!(exif::primary_proof(&ifd), Some(proof()));
    }

    #[test]
    fn test_unsupported_format_returns_original() {
        let input = b"GIF89a not supported".to_vec();
        let result = Embedder::default().embed(&input, &Manifest::new("test"), &proof(), None);
        assert_eq!(result.image_bytes, input);
        assert!(!result.is_embedded());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_undecodable_input_returns_original() {
        let mut input = png::SIGNATURE.to_vec();
        input.extend_from_slice(b"broken");
        let result = Embedder::default().embed(&input, &Manifest::new("test"), &proof(), None);
        assert_eq!(result.image_bytes, input);
        assert_eq!(result.format, Some(ImageFormat::Png));
        assert!(!result.is_embedded());
    }

    #[test]
    fn test_strategy_subset() {
        let image = encode(image::ImageFormat::Png, 2, 2);
        let config = EmbedConfig {
            strategies: BTreeSet::from([EmbedStrategy::ContainerChunk]),
            ..Default::default()
        };
        let result = Embedder::new(config).embed(&image, &Manifest::new("test"), &proof(), None);
        assert_eq!(
            result.strategies_applied,
            BTreeSet::from([EmbedStrategy::ContainerChunk])
        );
        assert!(png::read_xmp(&result.image_bytes).is_none());
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&EmbedStrategy::ContainerChunk).unwrap(),
            "\"containerChunk\""
        );
        assert_eq!(EmbedStrategy::XmpChunk.to_string(), "xmpChunk");
    }
}
