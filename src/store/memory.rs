use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{PipelineError, Result};
use crate::store::SharedState;

/// In-process [`SharedState`]. Clones share the same underlying maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    hashes: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection; every call fails until restored.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PipelineError::Connectivity(
                "shared state store is unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedState for MemoryStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.check_online()?;
        self.hashes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.check_online()?;
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check_online()?;
        Ok(self
            .hashes
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        self.check_online()?;
        if let Some(hash) = self.hashes.write().await.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online()?;
        self.hashes.write().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }
}
