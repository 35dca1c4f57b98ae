//! Load-or-enroll certificate chains for protected keys.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::authority::CertificateAuthority;
use super::csr::{build_csr, CertificateSubject};
use crate::keystore::crypto::same_public_key;
use crate::keystore::{KeyHandle, KeyMaterialStore};
use crate::prefs::{PrefKey, PreferenceStore};
use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

/// Obtains and caches certificate chains for keys in the protected store.
///
/// Enrollment is never retried automatically; an [`ProofmarkError::Enrollment`]
/// leaves the cache untouched and the caller may simply call again.
#[derive(Clone)]
pub struct EnrollmentClient {
    keys: KeyMaterialStore,
    authority: Arc<dyn CertificateAuthority>,
    prefs: Arc<dyn PreferenceStore>,
    subject: CertificateSubject,
}

impl EnrollmentClient {
    pub fn new(
        keys: KeyMaterialStore,
        authority: Arc<dyn CertificateAuthority>,
        prefs: Arc<dyn PreferenceStore>,
        subject: CertificateSubject,
    ) -> Self {
        Self {
            keys,
            authority,
            prefs,
            subject,
        }
    }

    /// Return the chain for `alias`, enrolling only if no valid chain is cached.
    pub async fn enroll(&self, alias: &KeyAlias) -> Result<CertificateChain> {
        let handle = self.keys.key_handle(alias).await?.ok_or_else(|| {
            ProofmarkError::Enrollment(format!("No key under alias {alias} to enroll"))
        })?;

        if let Some(chain) = self.cached_chain(alias) {
            if chain_matches(&chain, &handle) {
                debug!(alias = %alias, "Using cached certificate chain");
                return Ok(chain);
            }
            warn!(alias = %alias, "Cached certificate chain does not match key, re-enrolling");
        }

        self.enroll_fresh(&handle).await
    }

    async fn enroll_fresh(&self, handle: &KeyHandle) -> Result<CertificateChain> {
        let alias = &handle.alias;
        let csr = build_csr(&self.keys, alias, &self.subject).await?;
        let response = self.authority.submit_csr(&csr).await?;

        let chain = CertificateChain::from_pem(&response.certificate_chain).map_err(|e| {
            ProofmarkError::Enrollment(format!("Authority returned invalid chain: {e}"))
        })?;
        if !chain_matches(&chain, handle) {
            return Err(ProofmarkError::Enrollment(
                "Issued certificate does not certify the enrolled key".into(),
            ));
        }

        self.prefs
            .set(
                &PrefKey::CertificateChain(alias.clone()),
                chain.to_pem_bundle(),
            )
            .await?;
        self.keys.set_certificate_chain(alias, &chain).await?;

        info!(
            alias = %alias,
            certificate_id = %response.certificate_id,
            chain_len = chain.len(),
            "Enrolled certificate"
        );
        Ok(chain)
    }

    /// Cached chain for `alias`, if present and parsable.
    pub fn cached_chain(&self, alias: &KeyAlias) -> Option<CertificateChain> {
        let pem = self.prefs.get(&PrefKey::CertificateChain(alias.clone()))?;
        match CertificateChain::from_pem(&pem) {
            Ok(chain) => Some(chain),
            Err(e) => {
                warn!(alias = %alias, error = %e, "Discarding unparsable cached chain");
                None
            }
        }
    }

    /// Drop the cached chain so the next [`enroll`](Self::enroll) goes to the authority.
    pub async fn invalidate(&self, alias: &KeyAlias) -> Result<()> {
        self.prefs
            .remove(&PrefKey::CertificateChain(alias.clone()))
            .await
    }
}

fn chain_matches(chain: &CertificateChain, handle: &KeyHandle) -> bool {
    chain
        .leaf_public_key()
        .map(|leaf| same_public_key(&leaf, &handle.public_key))
        .unwrap_or(false)
}
