//! Error types for Proofmark

/// Main error type for Proofmark operations
#[derive(Debug, thiserror::Error)]
pub enum ProofmarkError {
    /// Required mode-specific settings are absent
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The wrap/import pipeline failed
    #[error("Key import error: {0}")]
    KeyImport(String),

    /// Certificate authority transport failure or rejection
    #[error("Enrollment error: {0}")]
    Enrollment(String),

    /// The signing engine rejected the manifest, stream or signer
    #[error("Signing error: {0}")]
    Signing(String),

    /// Staging copy failure; the original content is untouched
    #[error("IO error: {0}")]
    Io(String),

    /// Failure while writing signed content back to the original handle.
    /// The original content may be partially overwritten.
    #[error("Commit error (original content may be partially overwritten): {0}")]
    Commit(String),

    #[error("Key store error: {0}")]
    KeyStore(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Remote signer error: {0}")]
    Remote(String),
}

impl ProofmarkError {
    /// Whether a caller may reasonably retry the same operation.
    ///
    /// Proofmark never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Enrollment(_) | Self::KeyImport(_) | Self::Io(_) | Self::Remote(_)
        )
    }

    /// Whether the caller's original file is guaranteed to be unmodified.
    pub fn original_intact(&self) -> bool {
        !matches!(self, Self::Commit(_))
    }

    /// Short, stable name of the error kind (used in audit records)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::KeyImport(_) => "key_import",
            Self::Enrollment(_) => "enrollment",
            Self::Signing(_) => "signing",
            Self::Io(_) => "io",
            Self::Commit(_) => "commit",
            Self::KeyStore(_) => "key_store",
            Self::Manifest(_) => "manifest",
            Self::Remote(_) => "remote",
        }
    }
}

impl From<std::io::Error> for ProofmarkError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ProofmarkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Manifest(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for ProofmarkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

/// Result type alias for Proofmark operations
pub type Result<T> = std::result::Result<T, ProofmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_is_the_only_unsafe_outcome() {
        assert!(!ProofmarkError::Commit("disk full".into()).original_intact());
        assert!(ProofmarkError::Signing("bad manifest".into()).original_intact());
        assert!(ProofmarkError::Io("short read".into()).original_intact());
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ProofmarkError::Enrollment("503".into()).is_retryable());
        assert!(ProofmarkError::KeyImport("rejected".into()).is_retryable());
        assert!(!ProofmarkError::Configuration("no url".into()).is_retryable());
        assert!(!ProofmarkError::Signing("engine".into()).is_retryable());
    }

    #[test]
    fn test_io_conversion() {
        let err: ProofmarkError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), "io");
    }
}
