//! Trust anchors and their atomically swappable store.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};
use x509_parser::pem::Pem;

use super::certificate::CertificateInfo;
use crate::error::{CredlinkError, Result};

/// Root identities a chain must reach to be trusted.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorSet {
    anchors: Vec<CertificateInfo>,
}

impl TrustAnchorSet {
    pub fn new(anchors: Vec<CertificateInfo>) -> Self {
        Self { anchors }
    }

    pub fn from_der_list<I, B>(ders: I) -> Result<Self>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let anchors = ders
            .into_iter()
            .map(|der| CertificateInfo::parse(der.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { anchors })
    }

    /// Load every `CERTIFICATE` block from a PEM bundle. Other block types
    /// are skipped.
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Self> {
        let mut anchors = Vec::new();
        for block in Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| CredlinkError::CertificateParse(e.to_string()))?;
            if block.label != "CERTIFICATE" {
                warn!(label = %block.label, "Skipping non-certificate PEM block");
                continue;
            }
            anchors.push(CertificateInfo::parse(&block.contents)?);
        }
        Ok(Self { anchors })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CertificateInfo> {
        self.anchors.iter()
    }

    /// Anchor that is `root` itself: same fingerprint, or same subject and key.
    pub fn find_identity(&self, root: &CertificateInfo) -> Option<&CertificateInfo> {
        self.anchors
            .iter()
            .find(|a| a.fingerprint == root.fingerprint || a.same_identity(root))
    }

    /// Anchor whose key verifies `root`'s signature.
    pub fn find_issuer(&self, root: &CertificateInfo) -> Option<&CertificateInfo> {
        self.anchors.iter().find(|a| root.verify_issued_by(a))
    }
}

/// Shared holder of the current [`TrustAnchorSet`].
///
/// Readers take a snapshot `Arc`; a refresh replaces the whole set, so a
/// reader sees either the complete old set or the complete new one.
#[derive(Debug, Default)]
pub struct TrustStore {
    current: RwLock<Arc<TrustAnchorSet>>,
}

impl TrustStore {
    pub fn new(anchors: TrustAnchorSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(anchors)),
        }
    }

    pub fn snapshot(&self) -> Arc<TrustAnchorSet> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new set and return the previous one.
    pub fn replace(&self, anchors: TrustAnchorSet) -> Arc<TrustAnchorSet> {
        let count = anchors.len();
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let previous = std::mem::replace(&mut *guard, Arc::new(anchors));
        info!(anchors = count, "Trust anchors replaced");
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair};

    fn root(cn: &str) -> rcgen::Certificate {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, cn);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.self_signed(&key).unwrap()
    }

    #[test]
    fn test_pem_bundle() {
        let a = root("Anchor A");
        let b = root("Anchor B");
        let bundle = format!("{}\n{}", a.pem(), b.pem());

        let set = TrustAnchorSet::from_pem_bundle(bundle.as_bytes()).unwrap();
        assert_eq!(set.len(), 2);

        let a_info = CertificateInfo::parse(a.der()).unwrap();
        assert!(set.find_identity(&a_info).is_some());
    }

    #[test]
    fn test_empty_bundle() {
        let set = TrustAnchorSet::from_pem_bundle(b"").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_der_list_rejects_garbage() {
        let a = root("Anchor");
        assert!(TrustAnchorSet::from_der_list([a.der().to_vec()]).is_ok());
        assert!(TrustAnchorSet::from_der_list([b"junk".to_vec()]).is_err());
    }

    #[test]
    fn test_replace_keeps_old_snapshot() {
        let a = root("Old");
        let store = TrustStore::new(TrustAnchorSet::from_der_list([a.der().to_vec()]).unwrap());

        let held = store.snapshot();
        let previous = store.replace(TrustAnchorSet::default());

        assert_eq!(held.len(), 1);
        assert!(Arc::ptr_eq(&held, &previous));
        assert!(store.snapshot().is_empty());
    }
}
