//! Staged File Signer
//!
//! Signs content addressed by a [`FileHandle`] in place, using two private
//! temporary buffers so the original is only touched twice: one full read at
//! the start and one truncating write at the end.
//!
//! ```text
//!   handle ──read──▶ [source buffer] ──engine──▶ [signed buffer] ──write──▶ handle
//!     (1)                 (1)            (3)            (2)                  (4)
//! ```
//!
//! Failures before step 4 leave the original untouched. A failure while
//! writing step 4 is reported as [`ProofmarkError::Commit`]: the handle is not
//! transactional, so its content may be partially overwritten. Buffers are
//! removed on every exit path, including cancellation (step 5).

pub mod handle;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::engine::SigningEngine;
use crate::logging::{AuditLogger, SigningEvent};
use crate::manifest::{Manifest, SerializedManifest};
use crate::signer::Signer;
use crate::types::{ProofmarkError, Result};

pub use handle::{FileHandle, HandleReader, HandleWriter, PathHandle};
pub use session::StagingSession;

/// Byte counts of a completed signing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignReport {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// Stage-sign-commit orchestrator.
#[derive(Clone)]
pub struct StagedFileSigner {
    engine: Arc<dyn SigningEngine>,
    staging_dir: PathBuf,
    audit: Option<AuditLogger>,
}

impl StagedFileSigner {
    /// Stage buffers in the system temporary directory.
    pub fn new(engine: Arc<dyn SigningEngine>) -> Self {
        Self::with_staging_dir(engine, std::env::temp_dir())
    }

    pub fn with_staging_dir(engine: Arc<dyn SigningEngine>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            staging_dir: staging_dir.into(),
            audit: None,
        }
    }

    /// Record every attempt in `audit`.
    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn staging_dir(&self) -> &std::path::Path {
        &self.staging_dir
    }

    /// Sign the content behind `handle` in place.
    pub async fn sign_in_place(
        &self,
        handle: &dyn FileHandle,
        format: &str,
        manifest: &SerializedManifest,
        signer: &Signer,
    ) -> Result<SignReport> {
        let started = Instant::now();
        let result = self.stage_sign_commit(handle, format, manifest, signer).await;

        if let Some(audit) = &self.audit {
            let mut event = SigningEvent::new(handle.describe(), format, &signer.info())
                .with_duration(started.elapsed().as_millis() as u64);
            event = match &result {
                Ok(report) => event.with_bytes(report.bytes_in, report.bytes_out),
                Err(e) => event.with_error(e),
            };
            audit.log(event).await;
        }

        result
    }

    async fn stage_sign_commit(
        &self,
        handle: &dyn FileHandle,
        format: &str,
        manifest: &SerializedManifest,
        signer: &Signer,
    ) -> Result<SignReport> {
        let target = handle.describe();
        let session = StagingSession::create(&self.staging_dir)
            .map_err(|e| ProofmarkError::Io(format!("Cannot create staging buffers: {e}")))?;

        // 1. Copy the original into the source buffer
        let bytes_in = {
            let mut reader = handle
                .open_read()
                .await
                .map_err(|e| ProofmarkError::Io(format!("Cannot open {target}: {e}")))?;
            let mut staged = session.open_source_for_write().await?;
            let copied = tokio::io::copy(&mut reader, &mut staged)
                .await
                .map_err(|e| ProofmarkError::Io(format!("Incomplete copy of {target}: {e}")))?;
            staged.flush().await?;
            copied
        };
        debug!(file = %target, bytes = bytes_in, "Staged source");

        // 2-3. Sign into the output buffer
        {
            let mut builder = self.engine.build_from_manifest_json(manifest.as_str())?;
            let mut source = tokio::fs::File::open(session.source_path()).await?;
            let mut output = session.open_output_for_write().await?;

            builder
                .sign(format, &mut source, &mut output, signer)
                .await?;
            output
                .flush()
                .await
                .map_err(|e| ProofmarkError::Io(format!("Cannot flush signed output: {e}")))?;
        }

        // 4. Commit the signed buffer back to the handle
        let mut signed = tokio::fs::File::open(session.output_path()).await?;
        let mut writer = handle
            .open_write()
            .await
            .map_err(|e| ProofmarkError::Io(format!("Cannot open {target} for writing: {e}")))?;

        let bytes_out = tokio::io::copy(&mut signed, &mut writer)
            .await
            .map_err(|e| ProofmarkError::Commit(format!("Writing {target} failed: {e}")))?;
        writer
            .shutdown()
            .await
            .map_err(|e| ProofmarkError::Commit(format!("Closing {target} failed: {e}")))?;
        drop(writer);
        drop(signed);

        // 5. Release the buffers
        if let Err(e) = session.close() {
            warn!(error = %e, "Failed to remove staging buffers");
        }

        info!(
            file = %target,
            format = %format,
            mode = %signer.mode(),
            bytes_in,
            bytes_out,
            "Signed file in place"
        );
        Ok(SignReport {
            bytes_in,
            bytes_out,
        })
    }

    /// Read the manifest embedded in the content behind `handle`.
    pub async fn verify(&self, handle: &dyn FileHandle) -> Result<Manifest> {
        let target = handle.describe();
        let session = StagingSession::create(&self.staging_dir)
            .map_err(|e| ProofmarkError::Io(format!("Cannot create staging buffers: {e}")))?;

        let mut reader = handle
            .open_read()
            .await
            .map_err(|e| ProofmarkError::Io(format!("Cannot open {target}: {e}")))?;
        let mut staged = session.open_source_for_write().await?;
        tokio::io::copy(&mut reader, &mut staged)
            .await
            .map_err(|e| ProofmarkError::Io(format!("Incomplete copy of {target}: {e}")))?;
        staged.flush().await?;
        drop(staged);

        let json = self.engine.read_manifest(session.source_path()).await?;
        Manifest::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Handle whose reads fail part-way through
    struct FlakyHandle;

    #[async_trait]
    impl FileHandle for FlakyHandle {
        fn describe(&self) -> String {
            "flaky".to_string()
        }

        async fn open_read(&self) -> std::io::Result<HandleReader> {
            let mock = tokio_test::io::Builder::new()
                .read(b"PMK1")
                .read_error(std::io::Error::other("detached"))
                .build();
            Ok(Box::new(mock))
        }

        async fn open_write(&self) -> std::io::Result<HandleWriter> {
            Err(std::io::Error::other("read-only"))
        }
    }

    #[tokio::test]
    async fn test_interrupted_read_is_io_error() {
        let dir = TempDir::new().unwrap();
        let staged = StagedFileSigner::with_staging_dir(Arc::new(MockEngine::new()), dir.path());

        let result = staged.verify(&FlakyHandle).await;

        assert!(matches!(result, Err(ProofmarkError::Io(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_default_staging_dir_is_temp_dir() {
        let staged = StagedFileSigner::new(Arc::new(MockEngine::new()));
        assert_eq!(staged.staging_dir(), std::env::temp_dir().as_path());
    }
}
