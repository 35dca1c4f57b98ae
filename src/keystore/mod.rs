//! Protected key material
//!
//! Keys are addressed by [`KeyAlias`] and never leave the store that created
//! (or imported) them: callers receive a [`KeyHandle`] with the public half and
//! ask the store to sign on their behalf.
//!
//! # Architecture
//!
//! ```text
//!   SignerFactory ──▶ KeyMaterialStore (async, spawn_blocking)
//!                            │
//!                            ▼
//!                 dyn ProtectedKeyStore (blocking capability)
//!                   ├── SoftwareKeyStore  (process memory, optionally sealed on disk)
//!                   └── HardwareKeyStore  (SecureElement slots, software fallback)
//! ```
//!
//! Hardware isolation is a request: a store that cannot honour it creates a
//! software-protected key and reports `is_hardware_backed = false` on the
//! returned handle.

pub mod crypto;
pub mod hardware;
pub mod import;
pub mod software;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

pub use hardware::{HardwareKeyStore, SecureElement, SimulatedElement};
pub use import::{ImportOutcome, SecureKeyImporter};
pub use software::SoftwareKeyStore;

/// Common name of the self-signed placeholder certificate
pub const PLACEHOLDER_SUBJECT: &str = "Proofmark Enrollment Placeholder";

// =============================================================================
// Key Types
// =============================================================================

/// What a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    /// Sign and verify (signing keys)
    Sign,
    /// Unwrap imported key material (ephemeral wrapping keys)
    Wrap,
}

/// Parameters for key generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySpec {
    pub purpose: KeyPurpose,
    pub hardware_isolated: bool,
}

impl KeySpec {
    pub fn signing(hardware_isolated: bool) -> Self {
        Self {
            purpose: KeyPurpose::Sign,
            hardware_isolated,
        }
    }

    pub fn wrapping(hardware_isolated: bool) -> Self {
        Self {
            purpose: KeyPurpose::Wrap,
            hardware_isolated,
        }
    }
}

/// Reference to a key inside a protected store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHandle {
    pub alias: KeyAlias,
    /// Uncompressed SEC1 public key
    pub public_key: Vec<u8>,
    pub purpose: KeyPurpose,
    pub is_hardware_backed: bool,
}

/// Wrapping scheme applied to imported key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapTransform {
    /// Ephemeral ECDH P-256 + SHA-256 KDF + ChaCha20-Poly1305 over PKCS#8 DER
    EcdhP256ChaCha20Poly1305,
}

/// Where and how an unwrapped key is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub alias: KeyAlias,
    pub hardware_isolated: bool,
}

// =============================================================================
// Protected Key Store Capability
// =============================================================================

/// Blocking capability over a protected key store.
///
/// Implementations must be thread-safe; async callers go through
/// [`KeyMaterialStore`], which moves every call onto the blocking pool.
pub trait ProtectedKeyStore: Send + Sync {
    /// Human-readable store name (for logs)
    fn name(&self) -> &str;

    /// Whether this store can create hardware-isolated keys at all
    fn supports_hardware_isolation(&self) -> bool;

    fn key_handle(&self, alias: &KeyAlias) -> Result<Option<KeyHandle>>;

    fn contains_alias(&self, alias: &KeyAlias) -> Result<bool> {
        Ok(self.key_handle(alias)?.is_some())
    }

    /// Generate a P-256 key under `alias`, replacing nothing: fails if taken.
    fn generate_key(&self, alias: &KeyAlias, spec: KeySpec) -> Result<KeyHandle>;

    /// ECDSA P-256/SHA-256 DER signature over `message`
    fn sign(&self, alias: &KeyAlias, message: &[u8]) -> Result<Vec<u8>>;

    fn certificate_chain(&self, alias: &KeyAlias) -> Result<Option<CertificateChain>>;

    fn set_certificate_chain(&self, alias: &KeyAlias, chain: &CertificateChain) -> Result<()>;

    /// Unwrap `wrapped` with the key held under `wrapping_alias` and store the
    /// result as a signing key under `target.alias`, replacing any existing key.
    fn import_wrapped_key(
        &self,
        wrapped: &[u8],
        wrapping_alias: &KeyAlias,
        transform: WrapTransform,
        target: &ImportSpec,
    ) -> Result<KeyHandle>;

    /// Returns whether anything was deleted
    fn delete_alias(&self, alias: &KeyAlias) -> Result<bool>;
}

// =============================================================================
// Key Material Store
// =============================================================================

/// Async facade over a [`ProtectedKeyStore`].
#[derive(Clone)]
pub struct KeyMaterialStore {
    store: Arc<dyn ProtectedKeyStore>,
}

impl KeyMaterialStore {
    pub fn new(store: Arc<dyn ProtectedKeyStore>) -> Self {
        Self { store }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn supports_hardware_isolation(&self) -> bool {
        self.store.supports_hardware_isolation()
    }

    pub(crate) fn protected(&self) -> Arc<dyn ProtectedKeyStore> {
        Arc::clone(&self.store)
    }

    /// Run a blocking store operation on the blocking thread pool.
    pub(crate) async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ProtectedKeyStore) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| ProofmarkError::KeyStore(format!("Key store task failed: {e}")))?
    }

    /// Return the key under `alias`, generating it first if absent.
    ///
    /// `hardware_isolated` is a request; check `is_hardware_backed` on the
    /// returned handle for what was actually provided.
    pub async fn ensure_key(&self, alias: &KeyAlias, hardware_isolated: bool) -> Result<KeyHandle> {
        let alias = alias.clone();
        let handle = self
            .run_blocking(move |store| {
                if let Some(existing) = store.key_handle(&alias)? {
                    debug!(alias = %alias, store = store.name(), "Reusing existing key");
                    return Ok(existing);
                }
                let handle = store.generate_key(&alias, KeySpec::signing(hardware_isolated))?;
                info!(
                    alias = %alias,
                    store = store.name(),
                    hardware_backed = handle.is_hardware_backed,
                    "Generated signing key"
                );
                Ok(handle)
            })
            .await?;

        if hardware_isolated && !handle.is_hardware_backed {
            warn!(
                alias = %handle.alias,
                "Hardware isolation requested but key is software-protected"
            );
        }
        Ok(handle)
    }

    pub async fn key_handle(&self, alias: &KeyAlias) -> Result<Option<KeyHandle>> {
        let alias = alias.clone();
        self.run_blocking(move |store| store.key_handle(&alias)).await
    }

    pub async fn sign(&self, alias: &KeyAlias, message: &[u8]) -> Result<Vec<u8>> {
        let alias = alias.clone();
        let message = message.to_vec();
        self.run_blocking(move |store| store.sign(&alias, &message))
            .await
    }

    pub async fn certificate_chain(&self, alias: &KeyAlias) -> Result<Option<CertificateChain>> {
        let alias = alias.clone();
        self.run_blocking(move |store| store.certificate_chain(&alias))
            .await
    }

    pub async fn set_certificate_chain(
        &self,
        alias: &KeyAlias,
        chain: &CertificateChain,
    ) -> Result<()> {
        let alias = alias.clone();
        let chain = chain.clone();
        self.run_blocking(move |store| store.set_certificate_chain(&alias, &chain))
            .await
    }

    pub async fn delete_alias(&self, alias: &KeyAlias) -> Result<bool> {
        let alias = alias.clone();
        self.run_blocking(move |store| store.delete_alias(&alias))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> KeyMaterialStore {
        KeyMaterialStore::new(Arc::new(SoftwareKeyStore::in_memory()))
    }

    #[tokio::test]
    async fn test_ensure_key_is_idempotent() {
        let keys = store();
        let alias = KeyAlias::from("proofmark.platform");

        let first = keys.ensure_key(&alias, false).await.unwrap();
        let second = keys.ensure_key(&alias, false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.purpose, KeyPurpose::Sign);
    }

    #[tokio::test]
    async fn test_hardware_request_is_reported_not_guaranteed() {
        let keys = store();
        let handle = keys
            .ensure_key(&KeyAlias::from("hw"), true)
            .await
            .unwrap();
        assert!(!handle.is_hardware_backed);
        assert!(!keys.supports_hardware_isolation());
    }

    #[tokio::test]
    async fn test_new_key_has_placeholder_certificate() {
        let keys = store();
        let alias = KeyAlias::from("k");
        let handle = keys.ensure_key(&alias, false).await.unwrap();

        let chain = keys.certificate_chain(&alias).await.unwrap().unwrap();
        assert!(crypto::same_public_key(
            &chain.leaf_public_key().unwrap(),
            &handle.public_key
        ));
    }
}
