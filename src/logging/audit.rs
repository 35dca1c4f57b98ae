//! Signing audit log
//!
//! One [`SigningEvent`] per signing attempt, emitted on the
//! `proofmark::audit` tracing target and optionally appended to a JSONL file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::signer::{SignerInfo, SigningMode};
use crate::types::ProofmarkError;

/// Outcome of a signing attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Signed,
    Failed,
}

/// Audit record for one signing attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Handle description of the signed file
    pub target: String,
    pub format: String,
    pub mode: SigningMode,
    pub signer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub hardware_backed: bool,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// False only after a failed commit
    pub original_intact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_out: Option<u64>,
    pub duration_ms: u64,
}

impl SigningEvent {
    pub fn new(target: impl Into<String>, format: impl Into<String>, signer: &SignerInfo) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            target: target.into(),
            format: format.into(),
            mode: signer.mode,
            signer: signer.variant.clone(),
            alias: signer.alias.as_ref().map(|a| a.to_string()),
            hardware_backed: signer.hardware_backed,
            outcome: Outcome::Signed,
            error_kind: None,
            error: None,
            original_intact: true,
            bytes_in: None,
            bytes_out: None,
            duration_ms: 0,
        }
    }

    /// Mark the attempt failed
    pub fn with_error(mut self, err: &ProofmarkError) -> Self {
        self.outcome = Outcome::Failed;
        self.error_kind = Some(err.kind().to_string());
        self.error = Some(err.to_string());
        self.original_intact = err.original_intact();
        self
    }

    pub fn with_bytes(mut self, bytes_in: u64, bytes_out: u64) -> Self {
        self.bytes_in = Some(bytes_in);
        self.bytes_out = Some(bytes_out);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Audit logger writing events to tracing and, optionally, a JSONL file
#[derive(Clone, Default)]
pub struct AuditLogger {
    inner: Arc<Mutex<AuditLoggerInner>>,
}

#[derive(Default)]
struct AuditLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append events to the JSONL file at `path`
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Audit logging initialized to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, event: SigningEvent) {
        info!(
            target: "proofmark::audit",
            event_id = %event.event_id,
            target_file = %event.target,
            mode = %event.mode,
            outcome = ?event.outcome,
            error_kind = event.error_kind.as_deref().unwrap_or(""),
            original_intact = event.original_intact,
            duration_ms = event.duration_ms,
            "Signing attempt"
        );

        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write audit event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush audit log: {}", e);
            }
        }
    }
}
