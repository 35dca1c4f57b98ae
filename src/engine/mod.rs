//! Signing engine capability
//!
//! The engine embeds a signed manifest into a media container. Proofmark does
//! not implement it; it drives whatever engine it is given through these
//! traits. [`mock::MockEngine`] is a stand-in for tests.

pub mod mock;

use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::signer::Signer;
use crate::types::ProofmarkError;

pub use mock::MockEngine;

/// Errors reported by a signing engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    #[error("Malformed source: {0}")]
    MalformedSource(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The signer failed or was misused
    #[error("Signer failed: {0}")]
    Signer(String),

    #[error("No manifest found in {0}")]
    NoManifest(String),

    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),
}

impl From<EngineError> for ProofmarkError {
    fn from(err: EngineError) -> Self {
        Self::Signing(err.to_string())
    }
}

/// Sequential byte source handed to the engine
pub type SourceStream<'a> = &'a mut (dyn AsyncRead + Send + Unpin);

/// Sequential byte sink handed to the engine
pub type DestStream<'a> = &'a mut (dyn AsyncWrite + Send + Unpin);

/// Entry point of a signing engine.
#[async_trait]
pub trait SigningEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare a builder for one signing operation.
    fn build_from_manifest_json(&self, json: &str) -> Result<Box<dyn EngineBuilder>, EngineError>;

    /// Manifest JSON embedded in the file at `path`.
    async fn read_manifest(&self, path: &Path) -> Result<String, EngineError>;
}

/// One signing operation over a prepared manifest.
#[async_trait]
pub trait EngineBuilder: Send {
    /// Read all of `source`, write the signed asset to `dest`.
    async fn sign(
        &mut self,
        format: &str,
        source: SourceStream<'_>,
        dest: DestStream<'_>,
        signer: &Signer,
    ) -> Result<(), EngineError>;
}
