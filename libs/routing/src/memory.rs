//! In-memory key/value store for tests and local development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::KvError;
use crate::kv::KvStore;

/// [`KvStore`] held in a sorted map.
///
/// Behaves like the Consul store with one difference that tests rely on:
/// deleting a prefix that matches nothing returns [`KvError::NotFound`],
/// which exercises the callers' not-found tolerance.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, String>>,
    rejected_prefixes: RwLock<Vec<String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent put under `prefix` fail.
    pub async fn reject_writes_under(&self, prefix: impl Into<String>) {
        self.rejected_prefixes.write().await.push(prefix.into());
    }

    /// Copy of every key and value currently stored.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<String, KvError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        let rejected = self
            .rejected_prefixes
            .read()
            .await
            .iter()
            .any(|p| key.starts_with(p.as_str()));
        if rejected {
            return Err(KvError::Rejected(key.to_string()));
        }

        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), KvError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));

        if entries.len() == before {
            return Err(KvError::NotFound(prefix.to_string()));
        }
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
