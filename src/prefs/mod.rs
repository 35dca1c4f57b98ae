//! Preference storage
//!
//! Proofmark reads its signing configuration (mode, remote endpoint, custom
//! certificate/key, hardware alias) and writes its caches (certificate chains,
//! import hashes) through an injected [`PreferenceStore`].
//!
//! Reads are synchronous lookups. Writes are async and publish the changed key
//! on a broadcast channel so long-lived components (the signer factory) can
//! react to configuration changes that concern them.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::signer::SigningMode;
use crate::types::{KeyAlias, Result};

pub use file::FilePreferences;
pub use memory::MemoryPreferences;

/// Capacity of the change-notification channel
pub const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Typed preference keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PrefKey {
    /// Selected [`SigningMode`]
    SigningMode,
    /// Remote signing service configuration URL
    RemoteUrl,
    /// Bearer token for the remote signing service
    RemoteToken,
    /// PEM certificate chain for custom-key signing
    CustomCertificate,
    /// PEM private key for custom-key signing
    CustomPrivateKey,
    /// Alias of the hardware-isolated signing key
    HardwareAlias,
    /// Cached enrolled certificate chain for an alias
    CertificateChain(KeyAlias),
    /// Content hash of the last key imported under an alias
    ImportHash(KeyAlias),
}

impl PrefKey {
    /// Flat storage key used by persistent implementations.
    pub fn storage_key(&self) -> String {
        match self {
            Self::SigningMode => "signing_mode".to_string(),
            Self::RemoteUrl => "remote_url".to_string(),
            Self::RemoteToken => "remote_token".to_string(),
            Self::CustomCertificate => "custom_certificate".to_string(),
            Self::CustomPrivateKey => "custom_private_key".to_string(),
            Self::HardwareAlias => "hardware_alias".to_string(),
            Self::CertificateChain(alias) => format!("certificate_chain.{alias}"),
            Self::ImportHash(alias) => format!("import_hash.{alias}"),
        }
    }

    /// Signing mode whose cached signer depends on this key, if any.
    pub fn affected_mode(&self) -> Option<SigningMode> {
        match self {
            Self::RemoteUrl | Self::RemoteToken => Some(SigningMode::RemoteService),
            Self::CustomCertificate | Self::CustomPrivateKey => Some(SigningMode::CustomKey),
            Self::HardwareAlias => Some(SigningMode::HardwareIsolated),
            _ => None,
        }
    }
}

/// Injected key-value configuration store.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Current value of `key`.
    fn get(&self, key: &PrefKey) -> Option<String>;

    /// Store `value` under `key`, notifying subscribers if it changed.
    async fn set(&self, key: &PrefKey, value: String) -> Result<()>;

    /// Remove `key`, notifying subscribers if it was present.
    async fn remove(&self, key: &PrefKey) -> Result<()>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<PrefKey>;
}
