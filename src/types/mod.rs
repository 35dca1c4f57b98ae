//! Shared data model: key aliases, certificate chains and locations.

pub mod error;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_cert::der::pem::LineEnding;
use x509_cert::der::EncodePem;
use x509_cert::Certificate;

pub use error::{ProofmarkError, Result};

// =============================================================================
// Key Alias
// =============================================================================

/// Opaque name of a key inside the protected key store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyAlias(String);

impl KeyAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyAlias {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for KeyAlias {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Certificate Chain
// =============================================================================

/// Ordered PEM certificate chain, leaf first.
///
/// Construction always parses every certificate, so a `CertificateChain`
/// value is never empty and never holds unparsable PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct CertificateChain {
    certificates: Vec<String>,
}

impl CertificateChain {
    /// Parse a PEM bundle containing one or more certificates.
    pub fn from_pem(bundle: &str) -> Result<Self> {
        let parsed = Certificate::load_pem_chain(bundle.as_bytes())
            .map_err(|e| ProofmarkError::Configuration(format!("Invalid certificate PEM: {e}")))?;

        if parsed.is_empty() {
            return Err(ProofmarkError::Configuration(
                "Certificate chain contains no certificates".into(),
            ));
        }

        let certificates = parsed
            .iter()
            .map(|cert| cert.to_pem(LineEnding::LF))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProofmarkError::Configuration(format!("Certificate re-encoding failed: {e}")))?;

        Ok(Self { certificates })
    }

    /// All certificates, leaf first.
    pub fn certificates(&self) -> &[String] {
        &self.certificates
    }

    pub fn leaf(&self) -> &str {
        &self.certificates[0]
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Concatenated PEM bundle, suitable for persistence and for the engine.
    pub fn to_pem_bundle(&self) -> String {
        self.certificates.concat()
    }

    /// SEC1-encoded public key of the leaf certificate.
    pub fn leaf_public_key(&self) -> Result<Vec<u8>> {
        let leaf = Certificate::load_pem_chain(self.leaf().as_bytes())
            .map_err(|e| ProofmarkError::Configuration(format!("Invalid leaf certificate: {e}")))?;
        let leaf = leaf
            .first()
            .ok_or_else(|| ProofmarkError::Configuration("Missing leaf certificate".into()))?;

        Ok(leaf
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
            .to_vec())
    }
}

impl TryFrom<Vec<String>> for CertificateChain {
    type Error = ProofmarkError;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::from_pem(&value.concat())
    }
}

impl From<CertificateChain> for Vec<String> {
    fn from(value: CertificateChain) -> Self {
        value.certificates
    }
}

// =============================================================================
// Location
// =============================================================================

/// Caller-supplied capture location. Never fetched by Proofmark itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }
}
