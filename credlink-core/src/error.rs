use thiserror::Error;

use crate::container::ContainerError;

#[derive(Error, Debug)]
pub enum CredlinkError {
    #[error("Structural parse error: {0}")]
    StructuralParse(#[from] ContainerError),

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Invalid proof reference: {0}")]
    InvalidProofReference(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    #[error("Revocation oracle error: {0}")]
    Oracle(String),

    #[error("Revocation oracle timed out after {timeout_ms}ms")]
    OracleTimeout { timeout_ms: u64 },
}

pub type Result<T> = std::result::Result<T, CredlinkError>;

/// Largest extraction input accepted by default (64 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 64 * 1024 * 1024;
