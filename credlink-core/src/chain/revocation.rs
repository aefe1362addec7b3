//! Revocation oracles.
//!
//! The validator never talks to a revocation network itself. It asks a
//! [`RevocationOracle`] about every (certificate, issuer) link and bounds each
//! call with its own timeout.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use super::certificate::CertificateInfo;
use crate::error::{CredlinkError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RevocationStatus {
    Good,
    Revoked,
    Unknown,
}

impl RevocationStatus {
    /// Fold two link statuses: revoked dominates, then unknown.
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Revoked, _) | (_, Self::Revoked) => Self::Revoked,
            (Self::Unknown, _) | (_, Self::Unknown) => Self::Unknown,
            _ => Self::Good,
        }
    }
}

/// Source of revocation status, usually backed by OCSP or CRLs.
///
/// Implementations should enforce their own network timeout.
#[async_trait]
pub trait RevocationOracle: Send + Sync {
    async fn check(
        &self,
        certificate: &CertificateInfo,
        issuer: &CertificateInfo,
    ) -> Result<RevocationStatus>;
}

/// Oracle with no data; every link is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRevocationOracle;

#[async_trait]
impl RevocationOracle for NoRevocationOracle {
    async fn check(&self, _: &CertificateInfo, _: &CertificateInfo) -> Result<RevocationStatus> {
        Ok(RevocationStatus::Unknown)
    }
}

/// Offline CRL snapshot: revoked serials per covered issuer.
///
/// Issuers are keyed by fingerprint. A certificate whose issuer is not
/// covered is unknown.
#[derive(Debug, Clone, Default)]
pub struct SnapshotRevocationOracle {
    revoked: HashMap<String, HashSet<String>>,
}

impl SnapshotRevocationOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cover `issuer` with the given revoked serials (lowercase hex, as in
    /// [`CertificateInfo::serial`]). An empty list means "nothing revoked".
    pub fn cover<I, S>(&mut self, issuer: &CertificateInfo, serials: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.revoked
            .entry(issuer.fingerprint.clone())
            .or_default()
            .extend(serials.into_iter().map(|s| s.into().to_lowercase()));
        self
    }
}

#[async_trait]
impl RevocationOracle for SnapshotRevocationOracle {
    async fn check(
        &self,
        certificate: &CertificateInfo,
        issuer: &CertificateInfo,
    ) -> Result<RevocationStatus> {
        Ok(match self.revoked.get(&issuer.fingerprint) {
            None => RevocationStatus::Unknown,
            Some(serials) if serials.contains(&certificate.serial) => RevocationStatus::Revoked,
            Some(_) => RevocationStatus::Good,
        })
    }
}

/// Ask the oracle about one link. Errors and timeouts resolve to `Unknown`
/// and are returned as a warning.
pub(crate) async fn check_link(
    oracle: &dyn RevocationOracle,
    certificate: &CertificateInfo,
    issuer: &CertificateInfo,
    timeout: Duration,
) -> (RevocationStatus, Option<String>) {
    match tokio::time::timeout(timeout, oracle.check(certificate, issuer)).await {
        Ok(Ok(status)) => (status, None),
        Ok(Err(e)) => {
            warn!(subject = %certificate.subject, error = %e, "Revocation check failed");
            (RevocationStatus::Unknown, Some(e.to_string()))
        }
        Err(_) => {
            let e = CredlinkError::OracleTimeout {
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!(subject = %certificate.subject, error = %e, "Revocation check timed out");
            (RevocationStatus::Unknown, Some(e.to_string()))
        }
    }
}
