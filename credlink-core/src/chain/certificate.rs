//! Owned view of a parsed X.509 certificate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use x509_parser::extensions::ParsedExtension;
use x509_parser::prelude::X509Certificate;

use crate::error::{CredlinkError, Result};

/// Key usage bits relevant to chain validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUsageFlags {
    pub digital_signature: bool,
    pub non_repudiation: bool,
    pub key_cert_sign: bool,
    pub crl_sign: bool,
}

impl KeyUsageFlags {
    pub fn can_sign_content(&self) -> bool {
        self.digital_signature || self.non_repudiation
    }
}

/// One certificate of a chain, detached from the DER buffer it came from.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub der: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    /// Lowercase hex of the raw serial bytes
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// `None` when the certificate carries no key usage extension
    pub key_usage: Option<KeyUsageFlags>,
    pub is_ca: bool,
    pub path_len: Option<u32>,
    /// SHA-256 over the full DER encoding, lowercase hex
    pub fingerprint: String,
    pub spki: Vec<u8>,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
}

impl CertificateInfo {
    /// Parse a DER certificate. Trailing bytes are rejected.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let cert = parse_der(der)?;

        let validity = cert.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;

        let mut key_usage = None;
        let mut is_ca = false;
        let mut path_len = None;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::KeyUsage(ku) => {
                    key_usage = Some(KeyUsageFlags {
                        digital_signature: ku.digital_signature(),
                        non_repudiation: ku.non_repudiation(),
                        key_cert_sign: ku.key_cert_sign(),
                        crl_sign: ku.crl_sign(),
                    });
                }
                ParsedExtension::BasicConstraints(bc) => {
                    is_ca = bc.ca;
                    path_len = bc.path_len_constraint;
                }
                _ => {}
            }
        }

        Ok(Self {
            der: der.to_vec(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: hex::encode(cert.raw_serial()),
            not_before,
            not_after,
            key_usage,
            is_ca,
            path_len,
            fingerprint: hex::encode(Sha256::digest(der)),
            spki: cert.public_key().raw.to_vec(),
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
        })
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Same subject name and public key.
    pub fn same_identity(&self, other: &CertificateInfo) -> bool {
        self.subject_raw == other.subject_raw && self.spki == other.spki
    }

    /// True when `issuer`'s subject names this certificate's issuer and its
    /// key verifies this certificate's signature.
    pub fn verify_issued_by(&self, issuer: &CertificateInfo) -> bool {
        if self.issuer_raw != issuer.subject_raw {
            return false;
        }
        let (Ok(subject), Ok(issuer_cert)) = (parse_der(&self.der), parse_der(&issuer.der)) else {
            return false;
        };
        subject
            .verify_signature(Some(issuer_cert.public_key()))
            .is_ok()
    }
}

fn parse_der(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (rest, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| CredlinkError::CertificateParse(e.to_string()))?;
    if !rest.is_empty() {
        return Err(CredlinkError::CertificateParse(format!(
            "{} trailing bytes after certificate",
            rest.len()
        )));
    }
    Ok(cert)
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CredlinkError::CertificateParse(format!("validity out of range: {secs}")))
}
