//! Integration tests for in-place signing
//!
//! Runs the stage-sign-commit protocol end to end with the mock envelope
//! engine and checks what is left behind on success, failure and
//! cancellation.

mod common;

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use tempfile::TempDir;
use tokio::io::AsyncWrite;

use common::fixture;
use proofmark::engine::mock::open_envelope;
use proofmark::engine::MockEngine;
use proofmark::logging::{AuditLogger, Outcome, SigningEvent};
use proofmark::manifest::{ActionKind, ManifestAssembler, ManifestRequest, SerializedManifest};
use proofmark::signer::{Signer, SigningMode};
use proofmark::staging::{FileHandle, HandleReader, HandleWriter, PathHandle, StagedFileSigner};
use proofmark::types::ProofmarkError;

const ORIGINAL: &[u8] = b"0123456789";

/// Scratch space: one directory for the media file, one for staging buffers
struct Scratch {
    _media: TempDir,
    staging: TempDir,
    file: PathBuf,
}

impl Scratch {
    fn new(content: &[u8]) -> Self {
        let media = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let file = media.path().join("photo.jpg");
        std::fs::write(&file, content).unwrap();
        Self {
            _media: media,
            staging,
            file,
        }
    }

    fn staging_entries(&self) -> usize {
        std::fs::read_dir(self.staging.path()).unwrap().count()
    }
}

async fn platform_signer() -> Arc<Signer> {
    let fx = fixture();
    fx.factory
        .resolve_signer(SigningMode::PlatformKeystore)
        .await
        .unwrap()
}

fn manifest() -> SerializedManifest {
    let request = ManifestRequest::new("photo.jpg", "image/jpeg").direct_capture(true);
    ManifestAssembler::default().build_manifest(&request).unwrap()
}

fn staged(engine: &MockEngine, scratch: &Scratch) -> StagedFileSigner {
    StagedFileSigner::with_staging_dir(Arc::new(engine.clone()), scratch.staging.path())
}

/// Signed output replaces the original and carries a verifiable signature
#[tokio::test]
async fn test_sign_in_place_round_trip() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;
    let handle = PathHandle::new(&scratch.file);

    let report = staged(&engine, &scratch)
        .sign_in_place(&handle, "image/jpeg", &manifest(), &signer)
        .await
        .unwrap();

    assert_eq!(report.bytes_in, ORIGINAL.len() as u64);
    let signed = std::fs::read(&scratch.file).unwrap();
    assert_eq!(report.bytes_out, signed.len() as u64);
    assert_eq!(scratch.staging_entries(), 0);

    let envelope = open_envelope(&signed).unwrap();
    assert_eq!(envelope.payload, ORIGINAL);

    let leaf_key = signer.certificate_chain().leaf_public_key().unwrap();
    let verifying_key = VerifyingKey::from_sec1_bytes(&leaf_key).unwrap();
    let signature = Signature::from_der(&envelope.signature).unwrap();
    assert!(verifying_key
        .verify(&envelope.claim_bytes(), &signature)
        .is_ok());
}

/// The embedded manifest reads back as what was assembled
#[tokio::test]
async fn test_verify_reads_embedded_manifest() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;
    let handle = PathHandle::new(&scratch.file);
    let staged = staged(&engine, &scratch);
    let manifest = manifest();

    staged
        .sign_in_place(&handle, "image/jpeg", &manifest, &signer)
        .await
        .unwrap();
    let read_back = staged.verify(&handle).await.unwrap();

    assert_eq!(read_back, manifest.parse().unwrap());
    assert_eq!(read_back.format, "image/jpeg");
    assert_eq!(read_back.actions[0].action, ActionKind::Created);
    assert_eq!(scratch.staging_entries(), 0);
}

/// Unsigned files have no manifest to read
#[tokio::test]
async fn test_verify_unsigned_file_fails() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();

    let result = staged(&engine, &scratch)
        .verify(&PathHandle::new(&scratch.file))
        .await;

    assert!(matches!(result, Err(ProofmarkError::Signing(_))));
}

/// Engine failure leaves the original byte-identical and no buffers behind
#[tokio::test]
async fn test_engine_failure_leaves_original_intact() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new().with_failure(true);
    let signer = platform_signer().await;

    let result = staged(&engine, &scratch)
        .sign_in_place(&PathHandle::new(&scratch.file), "image/jpeg", &manifest(), &signer)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ProofmarkError::Signing(_)));
    assert!(err.original_intact());
    assert_eq!(std::fs::read(&scratch.file).unwrap(), ORIGINAL);
    assert_eq!(scratch.staging_entries(), 0);
    assert_eq!(engine.sign_count(), 1);
}

/// Unsupported formats are rejected by the engine before anything is written
#[tokio::test]
async fn test_unsupported_format_fails() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;

    let result = staged(&engine, &scratch)
        .sign_in_place(&PathHandle::new(&scratch.file), "jpeg", &manifest(), &signer)
        .await;

    assert!(matches!(result, Err(ProofmarkError::Signing(_))));
    assert_eq!(std::fs::read(&scratch.file).unwrap(), ORIGINAL);
}

/// A missing file is an I/O failure, not a signing failure
#[tokio::test]
async fn test_missing_file_is_io_error() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;
    let missing = PathHandle::new(scratch.file.with_file_name("missing.jpg"));

    let result = staged(&engine, &scratch)
        .sign_in_place(&missing, "image/jpeg", &manifest(), &signer)
        .await;

    assert!(matches!(result, Err(ProofmarkError::Io(_))));
    assert_eq!(engine.sign_count(), 0);
    assert_eq!(scratch.staging_entries(), 0);
}

/// Dropping an in-flight operation removes its buffers
#[tokio::test]
async fn test_cancellation_removes_buffers() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new().with_stall(true);
    let signer = platform_signer().await;
    let handle = PathHandle::new(&scratch.file);
    let staged = staged(&engine, &scratch);
    let manifest = manifest();

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        staged.sign_in_place(&handle, "image/jpeg", &manifest, &signer),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(engine.sign_count(), 1);
    assert_eq!(std::fs::read(&scratch.file).unwrap(), ORIGINAL);
    assert_eq!(scratch.staging_entries(), 0);
}

/// In-memory content, so the first poll runs straight into the staging copy
struct MemHandle {
    content: Vec<u8>,
}

#[async_trait]
impl FileHandle for MemHandle {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn open_read(&self) -> std::io::Result<HandleReader> {
        Ok(Box::new(std::io::Cursor::new(self.content.clone())))
    }

    async fn open_write(&self) -> std::io::Result<HandleWriter> {
        Ok(Box::new(tokio::io::sink()))
    }
}

/// Dropping the operation after its first poll never leaves buffers behind
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_after_first_poll_removes_buffers() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;
    let handle = MemHandle {
        content: ORIGINAL.to_vec(),
    };
    let staged = staged(&engine, &scratch);
    let manifest = manifest();

    for _ in 0..200 {
        let operation = staged.sign_in_place(&handle, "image/jpeg", &manifest, &signer);
        let _ = operation.now_or_never();
    }

    // Let opens still queued on the blocking pool finish
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(scratch.staging_entries(), 0);
}

/// Handle whose writes fail after the first chunk
struct BrokenWriteHandle {
    source: PathBuf,
}

struct BrokenWriter {
    written: usize,
}

impl AsyncWrite for BrokenWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.written > 0 {
            return Poll::Ready(Err(std::io::Error::other("device removed")));
        }
        let n = buf.len().min(4);
        self.written += n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl FileHandle for BrokenWriteHandle {
    fn describe(&self) -> String {
        "broken-device".to_string()
    }

    async fn open_read(&self) -> std::io::Result<HandleReader> {
        Ok(Box::new(tokio::fs::File::open(&self.source).await?))
    }

    async fn open_write(&self) -> std::io::Result<HandleWriter> {
        Ok(Box::new(BrokenWriter { written: 0 }))
    }
}

/// A write failure during commit is reported distinctly
#[tokio::test]
async fn test_commit_failure_is_reported() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;
    let handle = BrokenWriteHandle {
        source: scratch.file.clone(),
    };

    let result = staged(&engine, &scratch)
        .sign_in_place(&handle, "image/jpeg", &manifest(), &signer)
        .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ProofmarkError::Commit(_)));
    assert!(!err.original_intact());
    assert_eq!(scratch.staging_entries(), 0);
}

fn read_events(path: &Path) -> Vec<SigningEvent> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Every attempt is recorded in the audit log
#[tokio::test]
async fn test_attempts_are_audited() {
    let scratch = Scratch::new(ORIGINAL);
    let engine = MockEngine::new();
    let signer = platform_signer().await;
    let handle = PathHandle::new(&scratch.file);

    let audit_dir = TempDir::new().unwrap();
    let audit_path = audit_dir.path().join("audit.jsonl");
    let audit = AuditLogger::new();
    audit.init_file(audit_path.clone()).await.unwrap();
    let staged = staged(&engine, &scratch).with_audit(audit);

    staged
        .sign_in_place(&handle, "image/jpeg", &manifest(), &signer)
        .await
        .unwrap();
    engine.set_failure(true);
    assert!(staged
        .sign_in_place(&handle, "image/jpeg", &manifest(), &signer)
        .await
        .is_err());

    let events = read_events(&audit_path);
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].outcome, Outcome::Signed);
    assert_eq!(events[0].mode, SigningMode::PlatformKeystore);
    assert_eq!(events[0].bytes_in, Some(ORIGINAL.len() as u64));

    assert_eq!(events[1].outcome, Outcome::Failed);
    assert_eq!(events[1].error_kind.as_deref(), Some("signing"));
    assert!(events[1].original_intact);
}
