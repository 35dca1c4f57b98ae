//! In-memory preference store.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{PrefKey, PreferenceStore, CHANGE_CHANNEL_CAPACITY};
use crate::types::Result;

/// Volatile preference store, used by tests and ephemeral sessions.
pub struct MemoryPreferences {
    values: DashMap<String, String>,
    changes: broadcast::Sender<PrefKey>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: DashMap::new(),
            changes,
        }
    }

    /// Seed a value without notifying subscribers.
    pub fn with(self, key: PrefKey, value: impl Into<String>) -> Self {
        self.values.insert(key.storage_key(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &PrefKey) -> Option<String> {
        self.values.get(&key.storage_key()).map(|v| v.value().clone())
    }

    async fn set(&self, key: &PrefKey, value: String) -> Result<()> {
        let previous = self.values.insert(key.storage_key(), value.clone());
        if previous.as_deref() != Some(value.as_str()) {
            // No subscribers is fine
            let _ = self.changes.send(key.clone());
        }
        Ok(())
    }

    async fn remove(&self, key: &PrefKey) -> Result<()> {
        if self.values.remove(&key.storage_key()).is_some() {
            let _ = self.changes.send(key.clone());
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<PrefKey> {
        self.changes.subscribe()
    }
}
