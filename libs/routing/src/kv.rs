use async_trait::async_trait;

use crate::error::KvError;

/// Minimal key/value interface the registrar and the orchestrator need.
///
/// Keys are `/`-separated paths; values are UTF-8 strings.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a single key. Absent keys return [`KvError::NotFound`].
    async fn get(&self, key: &str) -> Result<String, KvError>;

    /// Write a single key, creating or replacing it.
    async fn put(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Delete every key starting with `prefix`.
    ///
    /// Implementations may return [`KvError::NotFound`] when nothing matched.
    async fn delete_tree(&self, prefix: &str) -> Result<(), KvError>;

    /// List every key starting with `prefix`. No match is an empty list.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Read a key, mapping absence to `None`.
    async fn try_get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
