//! Signers
//!
//! A [`Signer`] is an immutable capability bound to one algorithm, one
//! certificate chain, one way of reaching the private key and an optional
//! timestamp-authority URL. The backend is a closed set of variants, one per
//! trust mechanism:
//!
//! | Mode               | Variant                        | Key custody                  |
//! |--------------------|--------------------------------|------------------------------|
//! | `PlatformKeystore` | [`Signer::Keystore`]           | protected store (software)   |
//! | `HardwareIsolated` | [`Signer::Hardware`]           | secure element, if available |
//! | `CustomKey`        | [`Signer::Keystore`] / [`Signer::DirectKey`] | imported / in memory |
//! | `RemoteService`    | [`Signer::Remote`]             | remote signing service       |
//!
//! Signers are built and cached by [`SignerFactory`].

pub mod direct;
pub mod factory;
pub mod keystore;
pub mod remote;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{CertificateChain, KeyAlias, ProofmarkError, Result};

pub use direct::DirectKeySigner;
pub use factory::{SignerFactory, SignerSettings};
pub use keystore::{HardwareConfig, HardwareSigner, KeystoreSigner};
pub use remote::RemoteSigner;

// =============================================================================
// Signing Mode
// =============================================================================

/// Trust backend selected for signing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    /// Key generated in the platform's protected store
    #[default]
    PlatformKeystore,
    /// Key generated in a hardware-isolated store
    HardwareIsolated,
    /// User-supplied certificate and private key
    CustomKey,
    /// Key custody delegated to a remote signing service
    RemoteService,
}

impl SigningMode {
    pub const ALL: [SigningMode; 4] = [
        SigningMode::PlatformKeystore,
        SigningMode::HardwareIsolated,
        SigningMode::CustomKey,
        SigningMode::RemoteService,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformKeystore => "platform_keystore",
            Self::HardwareIsolated => "hardware_isolated",
            Self::CustomKey => "custom_key",
            Self::RemoteService => "remote_service",
        }
    }
}

impl fmt::Display for SigningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningMode {
    type Err = ProofmarkError;

    fn from_str(s: &str) -> Result<Self> {
        let normalised = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalised)
            .ok_or_else(|| ProofmarkError::Configuration(format!("Unknown signing mode: {s}")))
    }
}

// =============================================================================
// Signing Algorithm
// =============================================================================

/// Signature algorithm advertised to the signing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgorithm {
    /// ECDSA P-256 / SHA-256 (all locally held keys)
    #[default]
    Es256,
    Es384,
    Es512,
    Ps256,
    Ps384,
    Ps512,
    Ed25519,
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Es256 => "es256",
            Self::Es384 => "es384",
            Self::Es512 => "es512",
            Self::Ps256 => "ps256",
            Self::Ps384 => "ps384",
            Self::Ps512 => "ps512",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Signer
// =============================================================================

/// Summary of a resolved signer, safe to log or display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub mode: SigningMode,
    pub variant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<KeyAlias>,
    pub algorithm: SigningAlgorithm,
    pub hardware_backed: bool,
    pub certificate_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_url: Option<String>,
}

/// Opaque signing capability handed to the signing engine.
#[derive(Debug)]
pub enum Signer {
    Keystore(KeystoreSigner),
    Hardware(HardwareSigner),
    DirectKey(DirectKeySigner),
    Remote(RemoteSigner),
}

impl Signer {
    pub fn mode(&self) -> SigningMode {
        match self {
            Self::Keystore(s) => s.mode(),
            Self::Hardware(_) => SigningMode::HardwareIsolated,
            Self::DirectKey(_) => SigningMode::CustomKey,
            Self::Remote(_) => SigningMode::RemoteService,
        }
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        match self {
            Self::Keystore(_) | Self::Hardware(_) | Self::DirectKey(_) => SigningAlgorithm::Es256,
            Self::Remote(s) => s.algorithm(),
        }
    }

    pub fn certificate_chain(&self) -> &CertificateChain {
        match self {
            Self::Keystore(s) => s.certificate_chain(),
            Self::Hardware(s) => s.certificate_chain(),
            Self::DirectKey(s) => s.certificate_chain(),
            Self::Remote(s) => s.certificate_chain(),
        }
    }

    pub fn timestamp_url(&self) -> Option<&str> {
        match self {
            Self::Keystore(s) => s.timestamp_url(),
            Self::Hardware(s) => s.timestamp_url(),
            Self::DirectKey(s) => s.timestamp_url(),
            Self::Remote(s) => s.timestamp_url(),
        }
    }

    /// Whether the private key is held by a secure element.
    pub fn is_hardware_backed(&self) -> bool {
        match self {
            Self::Keystore(s) => s.is_hardware_backed(),
            Self::Hardware(s) => s.config().hardware_backed,
            Self::DirectKey(_) | Self::Remote(_) => false,
        }
    }

    /// Sign `data` (the serialized claim), returning the raw signature.
    pub async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Keystore(s) => s.sign(data).await,
            Self::Hardware(s) => s.sign(data).await,
            Self::DirectKey(s) => s.sign(data),
            Self::Remote(s) => s.sign(data).await,
        }
    }

    pub fn info(&self) -> SignerInfo {
        let (variant, alias) = match self {
            Self::Keystore(s) => ("keystore", Some(s.alias().clone())),
            Self::Hardware(s) => ("hardware", Some(s.alias().clone())),
            Self::DirectKey(_) => ("direct_key", None),
            Self::Remote(_) => ("remote", None),
        };

        SignerInfo {
            mode: self.mode(),
            variant: variant.to_string(),
            alias,
            algorithm: self.algorithm(),
            hardware_backed: self.is_hardware_backed(),
            certificate_count: self.certificate_chain().len(),
            timestamp_url: self.timestamp_url().map(str::to_string),
        }
    }
}
