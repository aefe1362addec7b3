//! Provenance manifest model
//!
//! A [`Manifest`] is the logical claim that travels with an image: who
//! generated it, what it asserts, and how it was signed. It is serialized to
//! CBOR inside the binary container and to JSON for callers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::error::{CredlinkError, Result};

/// Longest proof reference accepted, in bytes.
pub const MAX_PROOF_REFERENCE_LEN: usize = 2048;

/// A single labelled assertion inside a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    /// Assertion label (e.g., "c2pa.actions")
    pub label: String,
    /// Structured assertion data
    pub data: serde_json::Value,
}

impl Assertion {
    pub fn new(label: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            label: label.into(),
            data,
        }
    }
}

/// Signature metadata attached to a manifest.
///
/// The signature bytes are opaque to this crate; producing and checking them
/// belongs to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    /// Algorithm identifier (e.g., "ES256")
    pub algorithm: String,
    /// Issuer identifier of the signing certificate
    pub issuer: String,
    /// Opaque signature bytes
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// The provenance claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Software that produced the claim. Serialized first: the CBOR scanner
    /// keys on this field.
    pub generator: String,
    /// Assertions carried by the claim
    pub assertions: Vec<Assertion>,
    /// Signature metadata, absent for unsigned claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
    /// Claim creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Manifest {
    /// Create an unsigned manifest with no assertions.
    pub fn new(generator: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            assertions: Vec::new(),
            signature: None,
            timestamp: None,
        }
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_signature(mut self, signature: SignatureBlock) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_signed(&self) -> bool {
        self.signature
            .as_ref()
            .is_some_and(|s| !s.signature.is_empty())
    }

    /// Serialize the manifest to CBOR bytes.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CredlinkError::SerializationError(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize a manifest from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CredlinkError::SerializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CredlinkError::SerializationError(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CredlinkError::SerializationError(e.to_string()))
    }

    /// Hex SHA3-256 of the CBOR form.
    pub fn digest(&self) -> Result<String> {
        Ok(digest_hex(&self.to_cbor()?))
    }
}

/// Hex SHA3-256 of arbitrary bytes.
pub(crate) fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Short human-readable summary of a signature, written into EXIF.
///
/// Format: `alg=<algorithm>;issuer=<issuer>;digest=<16 hex chars>`, or
/// `unsigned` when there is nothing to summarize.
pub fn signature_summary(manifest: &Manifest, signature: Option<&[u8]>) -> String {
    let block = manifest.signature.as_ref();
    let bytes = signature
        .filter(|s| !s.is_empty())
        .or_else(|| block.map(|b| b.signature.as_slice()).filter(|s| !s.is_empty()));

    match bytes {
        Some(bytes) => {
            let digest = digest_hex(bytes);
            format!(
                "alg={};issuer={};digest={}",
                block.map(|b| b.algorithm.as_str()).unwrap_or("opaque"),
                block.map(|b| b.issuer.as_str()).unwrap_or("unknown"),
                &digest[..16]
            )
        }
        None => "unsigned".to_string(),
    }
}

/// URI pointing at a remotely stored copy of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProofReference(String);

impl ProofReference {
    /// Validate and wrap a proof URI.
    ///
    /// Accepts absolute `http`/`https` URLs with a host, at most
    /// [`MAX_PROOF_REFERENCE_LEN`] bytes long. The stored value is the
    /// normalized URL: lowercase scheme and host, default port dropped.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() || value.len() > MAX_PROOF_REFERENCE_LEN {
            return Err(CredlinkError::InvalidProofReference(format!(
                "length {} outside 1..={}",
                value.len(),
                MAX_PROOF_REFERENCE_LEN
            )));
        }

        let url = url::Url::parse(value)
            .map_err(|e| CredlinkError::InvalidProofReference(e.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CredlinkError::InvalidProofReference(format!(
                "unsupported scheme: {}",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(CredlinkError::InvalidProofReference(
                "missing host".into(),
            ));
        }

        // normalized form, so equal URLs compare equal
        let normalized = url.as_str();
        if normalized.len() > MAX_PROOF_REFERENCE_LEN {
            return Err(CredlinkError::InvalidProofReference(format!(
                "normalized length {} exceeds {}",
                normalized.len(),
                MAX_PROOF_REFERENCE_LEN
            )));
        }
        Ok(Self(normalized.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProofReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProofReference {
    type Error = CredlinkError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ProofReference> for String {
    fn from(value: ProofReference) -> Self {
        value.0
    }
}

impl PartialEq<str> for ProofReference {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ProofReference {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Base64 encoding/decoding for variable-length byte vectors
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
