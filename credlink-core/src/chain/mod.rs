//! Certificate chain validation
//!
//! Decides whether the signing identity behind a manifest is trustworthy.
//! One call walks a fixed sequence of stages and stops at the first one that
//! rejects:
//!
//! ```text
//! Start → ParseChain → CheckExpiration → VerifyInterChainSignatures
//!       → CheckKeyUsageAndBasicConstraints → ReachTrustAnchor
//!       → CheckRevocation → Accept | Reject
//! ```
//!
//! Validation never returns an error. Every outcome, including unparseable
//! input, is a [`CertificateValidationResult`] carrying the typed
//! [`ChainRejection`] when the chain is not accepted.

mod certificate;
mod revocation;
mod trust;

pub use certificate::{CertificateInfo, KeyUsageFlags};
pub use revocation::{
    NoRevocationOracle, RevocationOracle, RevocationStatus, SnapshotRevocationOracle,
};
pub use trust::{TrustAnchorSet, TrustStore};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::ValidationOptions;

/// Validation stages, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Start,
    ParseChain,
    CheckExpiration,
    VerifyInterChainSignatures,
    CheckKeyUsageAndBasicConstraints,
    ReachTrustAnchor,
    CheckRevocation,
    Accept,
    Reject,
}

/// Why a chain was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ChainRejection {
    #[error("malformed certificate chain: {reason}")]
    Malformed { reason: String },

    #[error("certificate {index} is outside its validity window")]
    Expired { index: usize },

    #[error("chain signature validation failed")]
    BrokenSignature { index: usize },

    #[error("no trusted root found for certificate chain")]
    UntrustedRoot,

    #[error("certificate {index} has been revoked")]
    Revoked { index: usize },

    #[error("revocation status could not be determined")]
    RevocationUnknown,
}

/// Outcome of every check. A check that never ran because an earlier stage
/// rejected reads as `false` (or `Unknown` for revocation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainChecks {
    pub expiration: bool,
    pub signature_chain_intact: bool,
    pub key_usage_acceptable: bool,
    pub chain_reaches_trust_anchor: bool,
    pub revocation_status: RevocationStatus,
}

impl Default for ChainChecks {
    fn default() -> Self {
        Self {
            expiration: false,
            signature_chain_intact: false,
            key_usage_acceptable: false,
            chain_reaches_trust_anchor: false,
            revocation_status: RevocationStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateValidationResult {
    pub accepted: bool,
    pub checks: ChainChecks,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub rejection: Option<ChainRejection>,
    /// Last stage reached: `Accept`, or the stage that rejected
    pub stage: Stage,
}

impl CertificateValidationResult {
    fn new() -> Self {
        Self {
            accepted: false,
            checks: ChainChecks::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            rejection: None,
            stage: Stage::Start,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(?stage, "Chain validation stage");
        self.stage = stage;
    }

    fn reject(mut self, rejection: ChainRejection) -> Self {
        warn!(stage = ?self.stage, reason = %rejection, "Certificate chain rejected");
        self.errors.push(rejection.to_string());
        self.rejection = Some(rejection);
        self.accepted = false;
        self
    }
}

/// Validate a leaf-first DER certificate chain against `anchors`.
///
/// Each oracle call is bounded with `tokio::time::timeout`, so the future
/// must be polled inside a Tokio runtime with the time driver enabled
/// (`#[tokio::main]` or a runtime built with `enable_time`). Polling it on
/// another executor panics.
#[instrument(level = "debug", skip_all, fields(certificates = chain.len(), anchors = anchors.len(), strict = options.strict_revocation))]
pub async fn validate_chain<B: AsRef<[u8]>>(
    chain: &[B],
    anchors: &TrustAnchorSet,
    oracle: &dyn RevocationOracle,
    options: &ValidationOptions,
) -> CertificateValidationResult {
    let mut result = CertificateValidationResult::new();

    result.enter(Stage::ParseChain);
    if chain.is_empty() {
        return result.reject(ChainRejection::Malformed {
            reason: "empty chain".into(),
        });
    }
    let mut certs = Vec::with_capacity(chain.len());
    for (index, der) in chain.iter().enumerate() {
        match CertificateInfo::parse(der.as_ref()) {
            Ok(cert) => certs.push(cert),
            Err(e) => {
                return result.reject(ChainRejection::Malformed {
                    reason: format!("certificate {index}: {e}"),
                });
            }
        }
    }

    result.enter(Stage::CheckExpiration);
    let at = options.at.unwrap_or_else(Utc::now);
    if let Some(index) = certs.iter().position(|c| !c.is_valid_at(at)) {
        result.errors.push(validity_error(&certs[index], at));
        return result.reject(ChainRejection::Expired { index });
    }
    result.checks.expiration = true;

    result.enter(Stage::VerifyInterChainSignatures);
    for (index, pair) in certs.windows(2).enumerate() {
        if !pair[0].verify_issued_by(&pair[1]) {
            result.errors.push(format!(
                "{} is not signed by {}",
                pair[0].subject, pair[1].subject
            ));
            return result.reject(ChainRejection::BrokenSignature { index });
        }
    }
    result.checks.signature_chain_intact = true;

    result.enter(Stage::CheckKeyUsageAndBasicConstraints);
    let usage_warnings = key_usage_warnings(&certs);
    result.checks.key_usage_acceptable = usage_warnings.is_empty();
    result.warnings.extend(usage_warnings);

    result.enter(Stage::ReachTrustAnchor);
    let root = &certs[certs.len() - 1];
    // An anchor that is the root itself needs no further revocation link
    let anchor_issuer = if anchors.find_identity(root).is_some() {
        None
    } else if let Some(anchor) = anchors.find_issuer(root) {
        Some(anchor)
    } else {
        return result.reject(ChainRejection::UntrustedRoot);
    };
    result.checks.chain_reaches_trust_anchor = true;

    // an external anchor counts as position `certs.len()` in the chain
    if let Some(anchor) = anchor_issuer.filter(|a| !a.is_valid_at(at)) {
        result.checks.expiration = false;
        result.errors.push(validity_error(anchor, at));
        return result.reject(ChainRejection::Expired { index: certs.len() });
    }

    result.enter(Stage::CheckRevocation);
    let mut status = RevocationStatus::Good;
    let mut links: Vec<(usize, &CertificateInfo, &CertificateInfo)> = certs
        .windows(2)
        .enumerate()
        .map(|(index, pair)| (index, &pair[0], &pair[1]))
        .collect();
    if let Some(anchor) = anchor_issuer {
        links.push((certs.len() - 1, root, anchor));
    }
    for (index, cert, issuer) in links {
        let (link, warning) =
            revocation::check_link(oracle, cert, issuer, options.revocation_timeout).await;
        result.warnings.extend(warning);
        if link == RevocationStatus::Revoked {
            result.checks.revocation_status = RevocationStatus::Revoked;
            return result.reject(ChainRejection::Revoked { index });
        }
        status = status.combine(link);
    }
    result.checks.revocation_status = status;

    if status == RevocationStatus::Unknown {
        if options.strict_revocation {
            return result.reject(ChainRejection::RevocationUnknown);
        }
        result
            .warnings
            .push("revocation status unknown; accepted without revocation check".into());
    }

    result.enter(Stage::Accept);
    result.accepted = true;
    info!(
        subject = %certs[0].subject,
        revocation = ?status,
        warnings = result.warnings.len(),
        "Certificate chain accepted"
    );
    result
}

fn validity_error(cert: &CertificateInfo, at: DateTime<Utc>) -> String {
    format!(
        "{} valid {} to {}, checked at {}",
        cert.subject,
        cert.not_before.to_rfc3339(),
        cert.not_after.to_rfc3339(),
        at.to_rfc3339()
    )
}

/// Leaf must be able to sign content; every CA above it must be a CA with
/// room in its path length.
fn key_usage_warnings(certs: &[CertificateInfo]) -> Vec<String> {
    let mut warnings = Vec::new();

    let leaf = &certs[0];
    if let Some(usage) = leaf.key_usage {
        if !usage.can_sign_content() {
            warnings.push(format!(
                "{} lacks digitalSignature and nonRepudiation key usage",
                leaf.subject
            ));
        }
    }

    for (index, cert) in certs.iter().enumerate().skip(1) {
        if !cert.is_ca {
            warnings.push(format!("{} issues certificates but is not a CA", cert.subject));
            continue;
        }
        // CA certificates between this one and the leaf
        let below = (index - 1) as u32;
        if let Some(limit) = cert.path_len {
            if below > limit {
                warnings.push(format!(
                    "{} allows path length {limit} but has {below} intermediates below it",
                    cert.subject
                ));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
        KeyUsagePurpose,
    };

    struct Issued {
        cert: rcgen::Certificate,
        key: KeyPair,
    }

    fn params(cn: &str, ca: Option<BasicConstraints>) -> CertificateParams {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        match ca {
            Some(bc) => {
                params.is_ca = IsCa::Ca(bc);
                params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
            }
            None => params.key_usages = vec![KeyUsagePurpose::DigitalSignature],
        }
        params
    }

    fn self_signed(p: CertificateParams) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = p.self_signed(&key).unwrap();
        Issued { cert, key }
    }

    fn issue(p: CertificateParams, by: &Issued) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = p.signed_by(&key, &by.cert, &by.key).unwrap();
        Issued { cert, key }
    }

    fn anchors(roots: &[&Issued]) -> TrustAnchorSet {
        TrustAnchorSet::from_der_list(roots.iter().map(|r| r.cert.der().to_vec())).unwrap()
    }

    #[test]
    fn test_key_usage_warnings() {
        let root = self_signed(params("Root", Some(BasicConstraints::Constrained(0))));
        let mid = issue(params("Mid", Some(BasicConstraints::Unconstrained)), &root);
        let leaf = issue(params("Leaf", None), &mid);

        let certs: Vec<_> = [&leaf, &mid, &root]
            .iter()
            .map(|i| CertificateInfo::parse(i.cert.der()).unwrap())
            .collect();
        let warnings = key_usage_warnings(&certs);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("path length 0"));
    }

    #[test]
    fn test_non_ca_issuer_warns() {
        let root = self_signed(params("Root", Some(BasicConstraints::Unconstrained)));
        let not_ca = issue(params("Not CA", None), &root);
        let leaf = issue(params("Leaf", None), &not_ca);

        let certs: Vec<_> = [&leaf, &not_ca, &root]
            .iter()
            .map(|i| CertificateInfo::parse(i.cert.der()).unwrap())
            .collect();
        let warnings = key_usage_warnings(&certs);
        assert!(warnings.iter().any(|w| w.contains("not a CA")));
    }

    #[tokio::test]
    async fn test_empty_chain_is_malformed() {
        let chain: Vec<Vec<u8>> = Vec::new();
        let result = validate_chain(
            &chain,
            &TrustAnchorSet::default(),
            &NoRevocationOracle,
            &ValidationOptions::default(),
        )
        .await;
        assert!(!result.accepted);
        assert_eq!(result.stage, Stage::ParseChain);
        assert!(matches!(result.rejection, Some(ChainRejection::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_broken_link() {
        let root = self_signed(params("Root", Some(BasicConstraints::Unconstrained)));
        let stranger = self_signed(params("Stranger", Some(BasicConstraints::Unconstrained)));
        let leaf = issue(params("Leaf", None), &stranger);

        let chain = [leaf.cert.der().to_vec(), root.cert.der().to_vec()];
        let result = validate_chain(
            &chain,
            &anchors(&[&root]),
            &NoRevocationOracle,
            &ValidationOptions::default(),
        )
        .await;

        assert_eq!(result.rejection, Some(ChainRejection::BrokenSignature { index: 0 }));
        assert!(result.checks.expiration);
        assert!(!result.checks.signature_chain_intact);
        assert!(result
            .errors
            .iter()
            .any(|e| e == "chain signature validation failed"));
    }

    #[tokio::test]
    async fn test_root_issued_by_anchor() {
        let anchor = self_signed(params("Anchor", Some(BasicConstraints::Unconstrained)));
        let mid = issue(params("Mid", Some(BasicConstraints::Unconstrained)), &anchor);
        let leaf = issue(params("Leaf", None), &mid);

        // chain stops at the intermediate; the anchor is only in the trust set
        let chain = [leaf.cert.der().to_vec(), mid.cert.der().to_vec()];
        let mut oracle = SnapshotRevocationOracle::new();
        oracle
            .cover(&CertificateInfo::parse(mid.cert.der()).unwrap(), Vec::<String>::new())
            .cover(&CertificateInfo::parse(anchor.cert.der()).unwrap(), Vec::<String>::new());

        let result = validate_chain(
            &chain,
            &anchors(&[&anchor]),
            &oracle,
            &ValidationOptions::default(),
        )
        .await;

        assert!(result.accepted, "{:?}", result.errors);
        assert_eq!(result.checks.revocation_status, RevocationStatus::Good);
        assert!(result.warnings.is_empty());
        assert_eq!(result.stage, Stage::Accept);
    }
}
