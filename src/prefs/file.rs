//! JSON-file preference store.
//!
//! The whole document is rewritten on every change: written to a sibling
//! temporary file first, then renamed over the original, so a crash never
//! leaves a truncated preferences file behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::{PrefKey, PreferenceStore, CHANGE_CHANNEL_CAPACITY};
use crate::types::{ProofmarkError, Result};

/// Preference store persisted as a flat JSON object.
pub struct FilePreferences {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<PrefKey>,
}

impl FilePreferences {
    /// Open (or lazily create) the preference file at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<BTreeMap<String, String>>(&bytes).map_err(
                |e| {
                    ProofmarkError::Configuration(format!(
                        "Corrupt preferences file {}: {e}",
                        path.display()
                    ))
                },
            )?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), entries = values.len(), "Loaded preferences");

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            path,
            values: RwLock::new(values),
            write_lock: Mutex::new(()),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> BTreeMap<String, String> {
        match self.values.read() {
            Ok(values) => values.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply `update` to a copy, persist it, then publish it. Returns whether
    /// anything changed. On a failed write the in-memory values stay as they were.
    async fn mutate<F>(&self, update: F) -> Result<bool>
    where
        F: FnOnce(&mut BTreeMap<String, String>) -> bool,
    {
        let _guard = self.write_lock.lock().await;

        let mut next = self.snapshot();
        if !update(&mut next) {
            return Ok(false);
        }
        persist(&self.path, &next).await?;

        let mut values = self
            .values
            .write()
            .map_err(|_| ProofmarkError::Configuration("Preferences lock poisoned".into()))?;
        *values = next;
        Ok(true)
    }
}

async fn persist(path: &Path, values: &BTreeMap<String, String>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(values)
        .map_err(|e| ProofmarkError::Configuration(format!("Preferences encoding failed: {e}")))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl PreferenceStore for FilePreferences {
    fn get(&self, key: &PrefKey) -> Option<String> {
        let values = match self.values.read() {
            Ok(values) => values,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.get(&key.storage_key()).cloned()
    }

    async fn set(&self, key: &PrefKey, value: String) -> Result<()> {
        let storage_key = key.storage_key();
        let changed = self
            .mutate(|values| values.insert(storage_key, value.clone()).as_ref() != Some(&value))
            .await?;

        if changed {
            let _ = self.changes.send(key.clone());
        }
        Ok(())
    }

    async fn remove(&self, key: &PrefKey) -> Result<()> {
        let storage_key = key.storage_key();
        let changed = self
            .mutate(|values| values.remove(&storage_key).is_some())
            .await?;

        if changed {
            let _ = self.changes.send(key.clone());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PrefKey> {
        self.changes.subscribe()
    }
}
