//! Certificate chain validation against generated PKI fixtures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use credlink_core::{
    validate_chain, CertificateInfo, ChainRejection, CredlinkError, NoRevocationOracle,
    RevocationOracle, RevocationStatus, SnapshotRevocationOracle, Stage, TrustAnchorSet,
    TrustStore, ValidationOptions,
};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};

struct Issued {
    cert: rcgen::Certificate,
    key: KeyPair,
}

impl Issued {
    fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    fn info(&self) -> CertificateInfo {
        CertificateInfo::parse(self.cert.der()).unwrap()
    }
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

fn leaf_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    params.distinguished_name = dn;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params
}

fn root(cn: &str) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = ca_params(cn).self_signed(&key).unwrap();
    Issued { cert, key }
}

fn issue(params: CertificateParams, by: &Issued) -> Issued {
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &by.cert, &by.key).unwrap();
    Issued { cert, key }
}

/// Root, intermediate and leaf, plus a trust set holding the root.
fn pki() -> (Vec<Vec<u8>>, TrustAnchorSet, [Issued; 3]) {
    let root = root("CredLink Test Root");
    let mid = issue(ca_params("CredLink Test Intermediate"), &root);
    let leaf = issue(leaf_params("CredLink Test Signer"), &mid);
    let chain = vec![leaf.der(), mid.der(), root.der()];
    let anchors = TrustAnchorSet::from_der_list([root.der()]).unwrap();
    (chain, anchors, [leaf, mid, root])
}

fn covering(issuers: &[&Issued]) -> SnapshotRevocationOracle {
    let mut oracle = SnapshotRevocationOracle::new();
    for issuer in issuers {
        oracle.cover(&issuer.info(), Vec::<String>::new());
    }
    oracle
}

fn strict() -> ValidationOptions {
    ValidationOptions {
        strict_revocation: true,
        ..ValidationOptions::default()
    }
}

struct SlowOracle;

#[async_trait]
impl RevocationOracle for SlowOracle {
    async fn check(
        &self,
        _: &CertificateInfo,
        _: &CertificateInfo,
    ) -> credlink_core::Result<RevocationStatus> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(RevocationStatus::Good)
    }
}

#[tokio::test]
async fn test_good_chain_with_full_revocation_data() {
    let (chain, anchors, [_, mid, root]) = pki();
    let oracle = covering(&[&mid, &root]);

    let result = validate_chain(&chain, &anchors, &oracle, &strict()).await;

    assert!(result.accepted, "{:?}", result.errors);
    assert_eq!(result.stage, Stage::Accept);
    assert!(result.checks.expiration);
    assert!(result.checks.signature_chain_intact);
    assert!(result.checks.key_usage_acceptable);
    assert!(result.checks.chain_reaches_trust_anchor);
    assert_eq!(result.checks.revocation_status, RevocationStatus::Good);
    assert!(result.warnings.is_empty());
    assert!(result.rejection.is_none());
}

#[tokio::test]
async fn test_expired_leaf_is_rejected() {
    let root = root("Expiry Root");
    let mut params = leaf_params("Expired Signer");
    params.not_before = rcgen::date_time_ymd(2019, 1, 1);
    params.not_after = rcgen::date_time_ymd(2020, 1, 1);
    let leaf = issue(params, &root);

    let chain = [leaf.der(), root.der()];
    let anchors = TrustAnchorSet::from_der_list([root.der()]).unwrap();
    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &ValidationOptions::default()).await;

    assert!(!result.accepted);
    assert!(!result.checks.expiration);
    assert_eq!(result.rejection, Some(ChainRejection::Expired { index: 0 }));
}

#[tokio::test]
async fn test_root_issued_by_expired_anchor_is_rejected() {
    let mut params = ca_params("Lapsed Anchor");
    params.not_before = rcgen::date_time_ymd(2019, 1, 1);
    params.not_after = rcgen::date_time_ymd(2020, 1, 1);
    let key = KeyPair::generate().unwrap();
    let anchor = Issued {
        cert: params.self_signed(&key).unwrap(),
        key,
    };
    let mid = issue(ca_params("Cross-Signed Root"), &anchor);
    let leaf = issue(leaf_params("Cross-Signed Signer"), &mid);

    let chain = [leaf.der(), mid.der()];
    let anchors = TrustAnchorSet::from_der_list([anchor.der()]).unwrap();
    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &ValidationOptions::default()).await;

    assert!(!result.accepted);
    assert!(!result.checks.expiration);
    assert!(result.checks.chain_reaches_trust_anchor);
    assert_eq!(result.rejection, Some(ChainRejection::Expired { index: 2 }));

    // the same anchor at an instant inside its window is accepted
    let options = ValidationOptions {
        at: Some(Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap()),
        ..ValidationOptions::default()
    };
    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &options).await;
    assert!(result.accepted, "{:?}", result.errors);
}

#[tokio::test]
async fn test_validation_instant_is_configurable() {
    let (chain, anchors, _) = pki();
    let options = ValidationOptions {
        at: Some(Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap()),
        ..ValidationOptions::default()
    };

    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &options).await;
    assert!(!result.checks.expiration);
    assert!(matches!(result.rejection, Some(ChainRejection::Expired { .. })));
}

#[tokio::test]
async fn test_untrusted_root_is_rejected() {
    let (chain, _, _) = pki();
    let other = root("Somebody Else");
    let anchors = TrustAnchorSet::from_der_list([other.der()]).unwrap();

    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &ValidationOptions::default()).await;

    assert!(!result.accepted);
    assert!(result.checks.signature_chain_intact);
    assert!(!result.checks.chain_reaches_trust_anchor);
    assert_eq!(result.rejection, Some(ChainRejection::UntrustedRoot));
    assert!(result.errors.iter().any(|e| e.contains("no trusted root")));
}

#[tokio::test]
async fn test_unknown_revocation_soft_and_strict() {
    let (chain, anchors, _) = pki();

    let lenient = validate_chain(&chain, &anchors, &NoRevocationOracle, &ValidationOptions::default()).await;
    assert!(lenient.accepted);
    assert_eq!(lenient.checks.revocation_status, RevocationStatus::Unknown);
    assert!(!lenient.warnings.is_empty());

    let hard = validate_chain(&chain, &anchors, &NoRevocationOracle, &strict()).await;
    assert!(!hard.accepted);
    assert_eq!(hard.rejection, Some(ChainRejection::RevocationUnknown));
    assert_eq!(hard.checks, lenient.checks);
}

#[tokio::test]
async fn test_revoked_leaf_is_rejected() {
    let (chain, anchors, [leaf, mid, root]) = pki();
    let mut oracle = covering(&[&root]);
    oracle.cover(&mid.info(), [leaf.info().serial]);

    let result = validate_chain(&chain, &anchors, &oracle, &ValidationOptions::default()).await;

    assert!(!result.accepted);
    assert_eq!(result.checks.revocation_status, RevocationStatus::Revoked);
    assert_eq!(result.rejection, Some(ChainRejection::Revoked { index: 0 }));
    assert!(result.checks.chain_reaches_trust_anchor);
}

#[tokio::test]
async fn test_oracle_timeout_resolves_to_unknown() {
    let (chain, anchors, _) = pki();
    let options = ValidationOptions {
        revocation_timeout: Duration::from_millis(20),
        ..ValidationOptions::default()
    };

    let result = validate_chain(&chain, &anchors, &SlowOracle, &options).await;

    assert!(result.accepted);
    assert_eq!(result.checks.revocation_status, RevocationStatus::Unknown);
    let timeout = CredlinkError::OracleTimeout { timeout_ms: 20 }.to_string();
    assert!(result.warnings.iter().any(|w| *w == timeout), "{:?}", result.warnings);
}

#[tokio::test]
async fn test_malformed_member_is_rejected() {
    let (mut chain, anchors, _) = pki();
    chain[1] = b"not DER".to_vec();

    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &ValidationOptions::default()).await;
    assert_eq!(result.stage, Stage::ParseChain);
    match result.rejection {
        Some(ChainRejection::Malformed { reason }) => assert!(reason.starts_with("certificate 1")),
        other => panic!("unexpected rejection: {other:?}"),
    }
}

#[tokio::test]
async fn test_validation_is_idempotent() {
    let (chain, anchors, [_, mid, root]) = pki();
    let oracle = covering(&[&mid, &root]);
    let options = ValidationOptions::default();

    let first = validate_chain(&chain, &anchors, &oracle, &options).await;
    let second = validate_chain(&chain, &anchors, &oracle, &options).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_trust_store_swap_is_atomic_for_readers() {
    let (chain, anchors, _) = pki();
    let store = TrustStore::new(anchors);
    let options = ValidationOptions::default();

    let before = store.snapshot();
    store.replace(TrustAnchorSet::from_der_list([root("Rotated Root").der()]).unwrap());
    let after = store.snapshot();

    let old = validate_chain(&chain, &before, &NoRevocationOracle, &options).await;
    let new = validate_chain(&chain, &after, &NoRevocationOracle, &options).await;
    assert!(old.accepted);
    assert_eq!(new.rejection, Some(ChainRejection::UntrustedRoot));
}

#[tokio::test]
async fn test_result_serializes_with_camel_case_checks() {
    let (chain, anchors, _) = pki();
    let result = validate_chain(&chain, &anchors, &NoRevocationOracle, &strict()).await;

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["checks"]["revocationStatus"], "unknown");
    assert_eq!(json["rejection"]["kind"], "revocationUnknown");
}
