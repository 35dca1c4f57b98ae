//! Mock signing engine for testing.
//!
//! Wraps the payload in a small envelope instead of a real container:
//!
//! ```text
//! "PMK1" | u32 manifest len | manifest JSON | u32 signature len | signature | payload
//! ```
//!
//! The signature covers `manifest JSON || SHA-256(payload)`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{DestStream, EngineBuilder, EngineError, SigningEngine, SourceStream};
use crate::signer::Signer;

const MAGIC: &[u8; 4] = b"PMK1";

#[derive(Default)]
struct MockState {
    fail: AtomicBool,
    stall: AtomicBool,
    sign_count: AtomicU32,
}

/// Mock engine with failure and stall switches.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every signing call fail after consuming the source
    pub fn with_failure(self, fail: bool) -> Self {
        self.state.fail.store(fail, Ordering::SeqCst);
        self
    }

    /// Make every signing call hang after writing partial output
    pub fn with_stall(self, stall: bool) -> Self {
        self.state.stall.store(stall, Ordering::SeqCst);
        self
    }

    pub fn set_failure(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of signing calls started.
    pub fn sign_count(&self) -> u32 {
        self.state.sign_count.load(Ordering::SeqCst)
    }
}

/// Parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub manifest: String,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Bytes covered by the signature.
    pub fn claim_bytes(&self) -> Vec<u8> {
        claim_bytes(&self.manifest, &self.payload)
    }
}

fn claim_bytes(manifest: &str, payload: &[u8]) -> Vec<u8> {
    let mut claim = manifest.as_bytes().to_vec();
    claim.extend_from_slice(&Sha256::digest(payload));
    claim
}

fn take<'a>(bytes: &mut &'a [u8], len: usize) -> Result<&'a [u8], EngineError> {
    if bytes.len() < len {
        return Err(EngineError::MalformedSource("Truncated envelope".into()));
    }
    let (head, tail) = bytes.split_at(len);
    *bytes = tail;
    Ok(head)
}

fn take_len(bytes: &mut &[u8]) -> Result<usize, EngineError> {
    let raw = take(bytes, 4)?;
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
}

/// Split a signed envelope into its parts.
pub fn open_envelope(bytes: &[u8]) -> Result<Envelope, EngineError> {
    let mut rest = bytes;
    if take(&mut rest, MAGIC.len())? != MAGIC {
        return Err(EngineError::NoManifest("input".into()));
    }

    let manifest_len = take_len(&mut rest)?;
    let manifest = std::str::from_utf8(take(&mut rest, manifest_len)?)
        .map_err(|e| EngineError::MalformedSource(e.to_string()))?
        .to_string();
    let signature_len = take_len(&mut rest)?;
    let signature = take(&mut rest, signature_len)?.to_vec();

    Ok(Envelope {
        manifest,
        signature,
        payload: rest.to_vec(),
    })
}

fn encode_len(len: usize) -> Result<[u8; 4], EngineError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| EngineError::MalformedSource("Section too large".into()))
}

#[async_trait]
impl SigningEngine for MockEngine {
    fn name(&self) -> &str {
        "mock-envelope"
    }

    fn build_from_manifest_json(&self, json: &str) -> Result<Box<dyn EngineBuilder>, EngineError> {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|e| EngineError::MalformedManifest(e.to_string()))?;

        Ok(Box::new(MockBuilder {
            manifest: json.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn read_manifest(&self, path: &Path) -> Result<String, EngineError> {
        let bytes = tokio::fs::read(path).await?;
        open_envelope(&bytes)
            .map(|envelope| envelope.manifest)
            .map_err(|e| match e {
                EngineError::NoManifest(_) => EngineError::NoManifest(path.display().to_string()),
                other => other,
            })
    }
}

struct MockBuilder {
    manifest: String,
    state: Arc<MockState>,
}

#[async_trait]
impl EngineBuilder for MockBuilder {
    async fn sign(
        &mut self,
        format: &str,
        source: SourceStream<'_>,
        dest: DestStream<'_>,
        signer: &Signer,
    ) -> Result<(), EngineError> {
        self.state.sign_count.fetch_add(1, Ordering::SeqCst);

        if !format.contains('/') {
            return Err(EngineError::UnsupportedFormat(format.to_string()));
        }

        let mut payload = Vec::new();
        source.read_to_end(&mut payload).await?;

        if self.state.fail.load(Ordering::SeqCst) {
            return Err(EngineError::MalformedSource("mock engine failure".into()));
        }

        if self.state.stall.load(Ordering::SeqCst) {
            dest.write_all(MAGIC).await?;
            dest.flush().await?;
            std::future::pending::<()>().await;
        }

        let signature = signer
            .sign(&claim_bytes(&self.manifest, &payload))
            .await
            .map_err(|e| EngineError::Signer(e.to_string()))?;

        dest.write_all(MAGIC).await?;
        dest.write_all(&encode_len(self.manifest.len())?).await?;
        dest.write_all(self.manifest.as_bytes()).await?;
        dest.write_all(&encode_len(signature.len())?).await?;
        dest.write_all(&signature).await?;
        dest.write_all(&payload).await?;
        dest.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_envelope_rejects_plain_files() {
        assert!(matches!(
            open_envelope(b"\xff\xd8\xff\xe0 jpeg"),
            Err(EngineError::NoManifest(_))
        ));
        assert!(open_envelope(b"PM").is_err());
    }

    #[test]
    fn test_open_envelope_parses_sections() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(b"{}");
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(b"sig");
        bytes.extend_from_slice(b"payload");

        let envelope = open_envelope(&bytes).unwrap();
        assert_eq!(envelope.manifest, "{}");
        assert_eq!(envelope.signature, b"sig");
        assert_eq!(envelope.payload, b"payload");
    }

    #[test]
    fn test_malformed_manifest_is_rejected() {
        let engine = MockEngine::new();
        assert!(matches!(
            engine.build_from_manifest_json("{not json"),
            Err(EngineError::MalformedManifest(_))
        ));
    }
}
