//! Temporary buffers for one signing operation.

use std::io;
use std::path::Path;

use tempfile::TempPath;

const SOURCE_PREFIX: &str = "proofmark-source-";
const OUTPUT_PREFIX: &str = "proofmark-signed-";

/// Two private temporary files: the staged source copy and the signed output.
///
/// Both are deleted when the session is dropped, which covers early returns,
/// errors and cancelled futures alike.
#[derive(Debug)]
pub struct StagingSession {
    source: TempPath,
    output: TempPath,
}

impl StagingSession {
    /// Create both buffers in `dir` with unique, unpredictable names.
    pub fn create(dir: &Path) -> io::Result<Self> {
        let source = tempfile::Builder::new()
            .prefix(SOURCE_PREFIX)
            .tempfile_in(dir)?
            .into_temp_path();
        let output = tempfile::Builder::new()
            .prefix(OUTPUT_PREFIX)
            .tempfile_in(dir)?
            .into_temp_path();

        Ok(Self { source, output })
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Open the source buffer for writing, truncating it.
    ///
    /// Never creates the file: once the session is dropped, an open still
    /// pending on the blocking pool fails instead of recreating the buffer.
    pub async fn open_source_for_write(&self) -> io::Result<tokio::fs::File> {
        open_existing(&self.source).await
    }

    /// Open the output buffer for writing, truncating it.
    pub async fn open_output_for_write(&self) -> io::Result<tokio::fs::File> {
        open_existing(&self.output).await
    }

    /// Delete both buffers, reporting the first failure.
    pub fn close(self) -> io::Result<()> {
        let source = self.source.close();
        let output = self.output.close();
        source.and(output)
    }
}

async fn open_existing(path: &Path) -> io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
}
