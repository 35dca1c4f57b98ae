//! Certificate signing requests for keys held in the protected store.

use rcgen::{CertificateParams, DistinguishedName, DnType};
use serde::{Deserialize, Serialize};

use crate::keystore::crypto::DelegatedKeyPair;
use crate::keystore::KeyMaterialStore;
use crate::types::{KeyAlias, ProofmarkError, Result};

/// Subject fields placed in every CSR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateSubject {
    pub common_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizational_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl Default for CertificateSubject {
    fn default() -> Self {
        Self {
            common_name: "Proofmark Signer".to_string(),
            organization: None,
            organizational_unit: None,
            country: None,
        }
    }
}

impl CertificateSubject {
    fn distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, self.common_name.as_str());
        if let Some(org) = &self.organization {
            dn.push(DnType::OrganizationName, org.as_str());
        }
        if let Some(unit) = &self.organizational_unit {
            dn.push(DnType::OrganizationalUnitName, unit.as_str());
        }
        if let Some(country) = &self.country {
            dn.push(DnType::CountryName, country.as_str());
        }
        dn
    }
}

/// Build a PEM CSR for the key under `alias`, signed inside the store.
pub async fn build_csr(
    keys: &KeyMaterialStore,
    alias: &KeyAlias,
    subject: &CertificateSubject,
) -> Result<String> {
    let signing_store = keys.protected();
    let alias = alias.clone();
    let subject = subject.clone();

    keys.run_blocking(move |store| {
        let handle = store.key_handle(&alias)?.ok_or_else(|| {
            ProofmarkError::Enrollment(format!("No key under alias {alias} to enroll"))
        })?;

        let sign_alias = alias.clone();
        let key_pair = DelegatedKeyPair::new(
            handle.public_key,
            Box::new(move |msg: &[u8]| signing_store.sign(&sign_alias, msg)),
        )
        .into_key_pair()?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject.distinguished_name();

        params
            .serialize_request(&key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| ProofmarkError::Enrollment(format!("CSR generation failed: {e}")))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::SoftwareKeyStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_csr_is_pem_and_carries_subject() {
        let keys = KeyMaterialStore::new(Arc::new(SoftwareKeyStore::in_memory()));
        let alias = KeyAlias::from("proofmark.platform");
        keys.ensure_key(&alias, false).await.unwrap();

        let subject = CertificateSubject {
            organization: Some("Proofmark".into()),
            ..Default::default()
        };
        let csr = build_csr(&keys, &alias, &subject).await.unwrap();
        assert!(csr.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));

        assert!(rcgen::CertificateSigningRequestParams::from_pem(&csr).is_ok());
    }

    #[tokio::test]
    async fn test_csr_for_unknown_alias_fails() {
        let keys = KeyMaterialStore::new(Arc::new(SoftwareKeyStore::in_memory()));
        let result = build_csr(&keys, &KeyAlias::from("missing"), &CertificateSubject::default()).await;
        assert!(matches!(result, Err(ProofmarkError::Enrollment(_))));
    }
}
