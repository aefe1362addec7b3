//! Image container formats
//!
//! Byte-level readers and writers for the places a manifest can live inside
//! JPEG, PNG and WebP files, plus the shared EXIF and XMP payload codecs.

pub mod exif;
pub mod jpeg;
pub mod png;
pub mod webp;
pub mod xmp;

use std::io::Cursor;

use image::ImageReader;
use serde::{Deserialize, Serialize};

use crate::error::{CredlinkError, Result};
use crate::manifest::{Manifest, ProofReference};

/// Supported image container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Identify the format from magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&jpeg::SOI) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(&png::SIGNATURE) {
            Some(Self::Png)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
            Self::Webp => image::ImageFormat::WebP,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Current version of [`NativeRecord`].
pub const NATIVE_RECORD_VERSION: u8 = 1;

/// Format-native link record (PNG `crLk`, WebP `CRLK`), serialized as CBOR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeRecord {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_reference: Option<ProofReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
}

impl NativeRecord {
    pub fn new(manifest: &Manifest, proof: &ProofReference) -> Self {
        Self {
            version: NATIVE_RECORD_VERSION,
            proof_reference: Some(proof.clone()),
            manifest: Some(manifest.clone()),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CredlinkError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CredlinkError::SerializationError(e.to_string()))
    }
}

/// Pixel dimensions from the image header, without decoding pixel data.
pub fn probe_dimensions(bytes: &[u8], format: ImageFormat) -> Result<(u32, u32)> {
    ImageReader::with_format(Cursor::new(bytes), format.to_image_format())
        .into_dimensions()
        .map_err(|e| CredlinkError::ImageDecode(e.to_string()))
}

/// Fully decode the image and return its pixel dimensions.
pub fn decode_dimensions(bytes: &[u8], format: ImageFormat) -> Result<(u32, u32)> {
    let decoded = image::load_from_memory_with_format(bytes, format.to_image_format())
        .map_err(|e| CredlinkError::ImageDecode(e.to_string()))?;
    Ok((decoded.width(), decoded.height()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(&png::SIGNATURE), Some(ImageFormat::Png));
        assert_eq!(
            ImageFormat::sniff(b"RIFF\x10\x00\x00\x00WEBPVP8L"),
            Some(ImageFormat::Webp)
        );
        assert_eq!(ImageFormat::sniff(b"RIFF\x10\x00\x00\x00WAVE"), None);
        assert_eq!(ImageFormat::sniff(b""), None);
        assert_eq!(ImageFormat::sniff(b"GIF89a"), None);
    }

    #[test]
    fn test_native_record_cbor() {
        let manifest = Manifest::new("test");
        let proof = ProofReference::parse("https://proofs.example/abc123").unwrap();
        let record = NativeRecord::new(&manifest, &proof);
        let restored = NativeRecord::from_cbor(&record.to_cbor().unwrap()).unwrap();
        assert_eq!(restored, record);
        assert!(NativeRecord::from_cbor(b"\xff\x00").is_err());
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(ImageFormat::Webp.mime_type(), "image/webp");
        assert_eq!(ImageFormat::Png.to_string(), "image/png");
    }
}
