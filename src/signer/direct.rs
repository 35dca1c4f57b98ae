//! In-memory fallback signer for custom keys the store refused to import.

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::keystore::crypto::{parse_private_key_pem, public_key_bytes, same_public_key, sign_der};
use crate::prefs::{PrefKey, PreferenceStore};
use crate::types::{CertificateChain, ProofmarkError, Result};

/// Signs with the custom key stored in preferences.
///
/// Neither the PEM text nor the parsed key is kept between calls; both are
/// loaded inside [`sign`](Self::sign) and zeroized when it returns.
pub struct DirectKeySigner {
    chain: CertificateChain,
    prefs: Arc<dyn PreferenceStore>,
    timestamp_url: Option<String>,
}

impl DirectKeySigner {
    /// Validates that the configured key parses and matches the leaf certificate.
    pub fn new(
        chain: CertificateChain,
        prefs: Arc<dyn PreferenceStore>,
        timestamp_url: Option<String>,
    ) -> Result<Self> {
        let signer = Self {
            chain,
            prefs,
            timestamp_url,
        };
        signer
            .load_key()
            .map_err(|e| ProofmarkError::Configuration(e.to_string()))?;
        Ok(signer)
    }

    pub fn certificate_chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn timestamp_url(&self) -> Option<&str> {
        self.timestamp_url.as_deref()
    }

    fn load_key(&self) -> Result<p256::SecretKey> {
        let pem = Zeroizing::new(
            self.prefs
                .get(&PrefKey::CustomPrivateKey)
                .filter(|pem| !pem.trim().is_empty())
                .ok_or_else(|| ProofmarkError::Signing("Custom private key was removed".into()))?,
        );
        let secret = parse_private_key_pem(&pem)?;

        let leaf = self.chain.leaf_public_key()?;
        if !same_public_key(&leaf, &public_key_bytes(&secret.public_key())) {
            return Err(ProofmarkError::Signing(
                "Custom private key does not match the certificate".into(),
            ));
        }
        Ok(secret)
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let secret = self.load_key().map_err(|e| match e {
            ProofmarkError::Signing(_) => e,
            other => ProofmarkError::Signing(other.to_string()),
        })?;
        Ok(sign_der(&secret, data))
    }
}

impl fmt::Debug for DirectKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectKeySigner")
            .field("certificates", &self.chain.len())
            .field("timestamp_url", &self.timestamp_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::crypto::{generate_secret_key, DelegatedKeyPair};
    use crate::prefs::MemoryPreferences;
    use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
    use p256::pkcs8::{EncodePrivateKey, LineEnding};

    fn cert_for(secret: &p256::SecretKey) -> CertificateChain {
        let signer = secret.clone();
        let key_pair = DelegatedKeyPair::new(
            public_key_bytes(&secret.public_key()),
            Box::new(move |msg: &[u8]| Ok(sign_der(&signer, msg))),
        )
        .into_key_pair()
        .unwrap();
        crate::keystore::crypto::placeholder_certificate("custom", &key_pair).unwrap()
    }

    fn prefs_with_key(secret: &p256::SecretKey) -> Arc<MemoryPreferences> {
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        Arc::new(MemoryPreferences::new().with(PrefKey::CustomPrivateKey, pem.as_str()))
    }

    #[test]
    fn test_signature_verifies_against_key() {
        let secret = generate_secret_key();
        let signer = DirectKeySigner::new(cert_for(&secret), prefs_with_key(&secret), None).unwrap();

        let der = signer.sign(b"claim").unwrap();
        let signature = Signature::from_der(&der).unwrap();
        assert!(VerifyingKey::from(secret.public_key())
            .verify(b"claim", &signature)
            .is_ok());
    }

    #[test]
    fn test_mismatched_certificate_is_rejected() {
        let secret = generate_secret_key();
        let other = generate_secret_key();

        let result = DirectKeySigner::new(cert_for(&other), prefs_with_key(&secret), None);
        assert!(matches!(result, Err(ProofmarkError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_key_is_read_at_sign_time() {
        let secret = generate_secret_key();
        let prefs = prefs_with_key(&secret);
        let signer = DirectKeySigner::new(cert_for(&secret), prefs.clone(), None).unwrap();

        prefs.remove(&PrefKey::CustomPrivateKey).await.unwrap();

        let result = signer.sign(b"claim");
        assert!(matches!(result, Err(ProofmarkError::Signing(_))));
    }

    #[test]
    fn test_debug_redacts_key() {
        let secret = generate_secret_key();
        let signer = DirectKeySigner::new(cert_for(&secret), prefs_with_key(&secret), None).unwrap();
        assert!(!format!("{signer:?}").contains("PRIVATE KEY"));
    }
}
