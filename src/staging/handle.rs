//! Opaque file handles.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Readable stream opened from a [`FileHandle`]
pub type HandleReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable stream opened from a [`FileHandle`]
pub type HandleWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Content addressed by something other than a seekable local path.
///
/// Only sequential access is assumed: one full read, one truncating write.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// Display name for logs and audit records
    fn describe(&self) -> String;

    async fn open_read(&self) -> std::io::Result<HandleReader>;

    /// Open for writing, truncating existing content.
    async fn open_write(&self) -> std::io::Result<HandleWriter>;
}

/// Local filesystem path as a [`FileHandle`].
#[derive(Debug, Clone)]
pub struct PathHandle {
    path: PathBuf,
}

impl PathHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileHandle for PathHandle {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open_read(&self) -> std::io::Result<HandleReader> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }

    async fn open_write(&self) -> std::io::Result<HandleWriter> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        Ok(Box::new(file))
    }
}
