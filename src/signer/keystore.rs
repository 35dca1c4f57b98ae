//! Signers whose key lives in the protected key store.

use std::fmt;

use crate::keystore::KeyMaterialStore;
use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

use super::SigningMode;

fn signing_error(alias: &KeyAlias, err: ProofmarkError) -> ProofmarkError {
    ProofmarkError::Signing(format!("Key store signing with {alias} failed: {err}"))
}

/// Signs with a key held under an alias in the protected store.
///
/// Used for `PlatformKeystore` and for imported `CustomKey` keys.
pub struct KeystoreSigner {
    mode: SigningMode,
    alias: KeyAlias,
    keys: KeyMaterialStore,
    chain: CertificateChain,
    timestamp_url: Option<String>,
    hardware_backed: bool,
}

impl KeystoreSigner {
    pub fn new(
        mode: SigningMode,
        alias: KeyAlias,
        keys: KeyMaterialStore,
        chain: CertificateChain,
        timestamp_url: Option<String>,
        hardware_backed: bool,
    ) -> Self {
        Self {
            mode,
            alias,
            keys,
            chain,
            timestamp_url,
            hardware_backed,
        }
    }

    pub fn mode(&self) -> SigningMode {
        self.mode
    }

    pub fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    pub fn certificate_chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn timestamp_url(&self) -> Option<&str> {
        self.timestamp_url.as_deref()
    }

    pub fn is_hardware_backed(&self) -> bool {
        self.hardware_backed
    }

    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.keys
            .sign(&self.alias, data)
            .await
            .map_err(|e| signing_error(&self.alias, e))
    }
}

impl fmt::Debug for KeystoreSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreSigner")
            .field("mode", &self.mode)
            .field("alias", &self.alias)
            .field("store", &self.keys.store_name())
            .field("certificates", &self.chain.len())
            .field("timestamp_url", &self.timestamp_url)
            .finish()
    }
}

/// What the hardware store actually provided for a `HardwareIsolated` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareConfig {
    /// False when the store fell back to software protection
    pub hardware_backed: bool,
    pub store_name: String,
}

/// Signs with a key requested as hardware-isolated.
pub struct HardwareSigner {
    alias: KeyAlias,
    keys: KeyMaterialStore,
    chain: CertificateChain,
    timestamp_url: Option<String>,
    config: HardwareConfig,
}

impl HardwareSigner {
    pub fn new(
        alias: KeyAlias,
        keys: KeyMaterialStore,
        chain: CertificateChain,
        timestamp_url: Option<String>,
        config: HardwareConfig,
    ) -> Self {
        Self {
            alias,
            keys,
            chain,
            timestamp_url,
            config,
        }
    }

    pub fn alias(&self) -> &KeyAlias {
        &self.alias
    }

    pub fn certificate_chain(&self) -> &CertificateChain {
        &self.chain
    }

    pub fn timestamp_url(&self) -> Option<&str> {
        self.timestamp_url.as_deref()
    }

    pub fn config(&self) -> &HardwareConfig {
        &self.config
    }

    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.keys
            .sign(&self.alias, data)
            .await
            .map_err(|e| signing_error(&self.alias, e))
    }
}

impl fmt::Debug for HardwareSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareSigner")
            .field("alias", &self.alias)
            .field("config", &self.config)
            .field("certificates", &self.chain.len())
            .field("timestamp_url", &self.timestamp_url)
            .finish()
    }
}
