//! In-memory stores for tests and local development.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::api_keys::{generate_api_key, ApiKeyStore};
use super::containers::{ContainerRecord, ContainerStatus, ContainerStore};
use super::DbError;

#[derive(Debug, Default)]
struct ContainerTable {
    next_id: i64,
    rows: BTreeMap<i64, ContainerRecord>,
}

/// [`ContainerStore`] held in memory.
///
/// Mirrors the table constraints: unique names and unique runtime ids.
/// Every status write is also appended to a history log that tests use to
/// check the order of pipeline transitions.
#[derive(Debug, Default)]
pub struct MemoryContainerStore {
    table: Mutex<ContainerTable>,
    history: Mutex<Vec<(i64, ContainerStatus)>>,
}

impl MemoryContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status written for `id`, oldest first.
    pub async fn status_history(&self, id: i64) -> Vec<ContainerStatus> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|(row, _)| *row == id)
            .map(|(_, status)| *status)
            .collect()
    }
}

fn matches_key(record: &ContainerRecord, id_or_name: &str) -> bool {
    id_or_name.parse::<i64>().ok() == Some(record.id) || record.name == id_or_name
}

#[async_trait]
impl ContainerStore for MemoryContainerStore {
    async fn insert(&self, owner_id: &str, name: &str) -> Result<i64, DbError> {
        let mut table = self.table.lock().await;
        if table.rows.values().any(|r| r.name == name) {
            return Err(DbError::UniqueViolation {
                constraint: "containers_name_key".to_string(),
            });
        }

        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(
            id,
            ContainerRecord {
                id,
                runtime_id: None,
                name: name.to_string(),
                owner_id: owner_id.to_string(),
                status: ContainerStatus::Waiting,
                message: String::new(),
                default_shell: None,
            },
        );
        self.history
            .lock()
            .await
            .push((id, ContainerStatus::Waiting));
        Ok(id)
    }

    async fn find(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<Option<ContainerRecord>, DbError> {
        let table = self.table.lock().await;
        let mut candidates = table
            .rows
            .values()
            .filter(|r| r.owner_id == owner_id && matches_key(r, id_or_name));

        let first = candidates.next().cloned();
        let by_id = id_or_name
            .parse::<i64>()
            .ok()
            .and_then(|id| table.rows.get(&id))
            .filter(|r| r.owner_id == owner_id)
            .cloned();
        Ok(by_id.or(first))
    }

    async fn get(&self, id: i64) -> Result<Option<ContainerRecord>, DbError> {
        Ok(self.table.lock().await.rows.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: i64,
        status: ContainerStatus,
        message: &str,
    ) -> Result<(), DbError> {
        let mut table = self.table.lock().await;
        if let Some(row) = table.rows.get_mut(&id) {
            row.status = status;
            row.message = if status == ContainerStatus::Error {
                message.to_string()
            } else {
                String::new()
            };
            self.history.lock().await.push((id, status));
        }
        Ok(())
    }

    async fn set_runtime_id(&self, id: i64, runtime_id: &str) -> Result<(), DbError> {
        let mut table = self.table.lock().await;
        if table
            .rows
            .values()
            .any(|r| r.id != id && r.runtime_id.as_deref() == Some(runtime_id))
        {
            return Err(DbError::UniqueViolation {
                constraint: "containers_runtime_id_key".to_string(),
            });
        }
        if let Some(row) = table.rows.get_mut(&id) {
            row.runtime_id = Some(runtime_id.to_string());
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), DbError> {
        self.table.lock().await.rows.remove(&id);
        Ok(())
    }

    async fn list_pending_or_failed(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ContainerRecord>, DbError> {
        Ok(self
            .table
            .lock()
            .await
            .rows
            .values()
            .filter(|r| r.owner_id == owner_id)
            .filter(|r| r.status.is_pending() || r.status == ContainerStatus::Error)
            .cloned()
            .collect())
    }

    async fn set_default_shell(
        &self,
        owner_id: &str,
        id_or_name: &str,
        default_shell: Option<&str>,
    ) -> Result<bool, DbError> {
        let mut table = self.table.lock().await;
        let mut matched = false;
        for row in table
            .rows
            .values_mut()
            .filter(|r| r.owner_id == owner_id && matches_key(r, id_or_name))
        {
            row.default_shell = default_shell.map(str::to_string);
            matched = true;
        }
        Ok(matched)
    }
}

/// [`ApiKeyStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryApiKeyStore {
    keys: Mutex<BTreeMap<String, String>>,
}

impl MemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn get_or_create(&self, owner_id: &str) -> Result<String, DbError> {
        let mut keys = self.keys.lock().await;
        Ok(keys
            .entry(owner_id.to_string())
            .or_insert_with(generate_api_key)
            .clone())
    }

    async fn reissue(&self, owner_id: &str) -> Result<String, DbError> {
        let key = generate_api_key();
        self.keys
            .lock()
            .await
            .insert(owner_id.to_string(), key.clone());
        Ok(key)
    }

    async fn resolve(&self, api_key: &str) -> Result<Option<String>, DbError> {
        Ok(self
            .keys
            .lock()
            .await
            .iter()
            .find(|(_, key)| key.as_str() == api_key)
            .map(|(owner, _)| owner.clone()))
    }
}
