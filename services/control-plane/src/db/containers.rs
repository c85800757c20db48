//! Container record storage.
//!
//! One row per logical container. The record carries the desired name, the
//! owner, the lifecycle status and the runtime identifier once the runtime
//! has created the container. Name uniqueness is enforced by the table.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::DbError;

/// Lifecycle status of a container record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerStatus {
    Waiting,
    ImagePulling,
    Creating,
    Created,
    Running,
    Stopped,
    Error,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Waiting => "Waiting",
            ContainerStatus::ImagePulling => "ImagePulling",
            ContainerStatus::Creating => "Creating",
            ContainerStatus::Created => "Created",
            ContainerStatus::Running => "Running",
            ContainerStatus::Stopped => "Stopped",
            ContainerStatus::Error => "Error",
        }
    }

    /// Statuses for which the runtime does not (yet) know the container.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ContainerStatus::Waiting | ContainerStatus::ImagePulling | ContainerStatus::Creating
        )
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Waiting" => Ok(ContainerStatus::Waiting),
            "ImagePulling" => Ok(ContainerStatus::ImagePulling),
            "Creating" => Ok(ContainerStatus::Creating),
            "Created" => Ok(ContainerStatus::Created),
            "Running" => Ok(ContainerStatus::Running),
            "Stopped" => Ok(ContainerStatus::Stopped),
            "Error" => Ok(ContainerStatus::Error),
            other => Err(DbError::Decode(format!("unknown container status {other:?}"))),
        }
    }
}

/// A container record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: i64,
    pub runtime_id: Option<String>,
    pub name: String,
    pub owner_id: String,
    pub status: ContainerStatus,
    pub message: String,
    pub default_shell: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ContainerRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let status = status.parse().map_err(|e: DbError| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            runtime_id: row.try_get("runtime_id")?,
            name: row.try_get("name")?,
            owner_id: row.try_get("owner_id")?,
            status,
            message: row.try_get("message")?,
            default_shell: row.try_get("default_shell")?,
        })
    }
}

/// Durable table of container records.
///
/// Lookups by caller-supplied key are always scoped to an owner. The key may
/// be the numeric id or the name; an id match wins when both exist.
#[async_trait]
pub trait ContainerStore: Send + Sync {
    /// Insert a new record with status `Waiting` and return its id.
    ///
    /// A taken name fails with [`DbError::UniqueViolation`].
    async fn insert(&self, owner_id: &str, name: &str) -> Result<i64, DbError>;

    /// Find the owner's record addressed by id or name.
    async fn find(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<Option<ContainerRecord>, DbError>;

    /// Fetch a record by id regardless of owner.
    async fn get(&self, id: i64) -> Result<Option<ContainerRecord>, DbError>;

    /// Write a status. `message` is kept only for `Error`.
    async fn update_status(
        &self,
        id: i64,
        status: ContainerStatus,
        message: &str,
    ) -> Result<(), DbError>;

    async fn set_runtime_id(&self, id: i64, runtime_id: &str) -> Result<(), DbError>;

    async fn delete(&self, id: i64) -> Result<(), DbError>;

    /// The owner's records the runtime cannot answer for: pending or errored.
    async fn list_pending_or_failed(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ContainerRecord>, DbError>;

    /// Set the per-container default shell in one transaction.
    ///
    /// Returns `false` when no record matched.
    async fn set_default_shell(
        &self,
        owner_id: &str,
        id_or_name: &str,
        default_shell: Option<&str>,
    ) -> Result<bool, DbError>;
}

const RECORD_COLUMNS: &str =
    "id, runtime_id, name, owner_id, status, message, default_shell";

/// Postgres-backed [`ContainerStore`].
#[derive(Clone)]
pub struct PgContainerStore {
    pool: PgPool,
}

impl PgContainerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_id(id_or_name: &str) -> Option<i64> {
    id_or_name.parse::<i64>().ok()
}

#[async_trait]
impl ContainerStore for PgContainerStore {
    async fn insert(&self, owner_id: &str, name: &str) -> Result<i64, DbError> {
        let row = sqlx::query(
            r#"
            INSERT INTO containers (name, owner_id, status, message)
            VALUES ($1, $2, $3, '')
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(owner_id)
        .bind(ContainerStatus::Waiting.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::from_write)?;

        row.try_get("id").map_err(DbError::Query)
    }

    async fn find(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<Option<ContainerRecord>, DbError> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM containers
            WHERE owner_id = $1 AND (id = $2 OR name = $3)
            ORDER BY (id = $2) DESC NULLS LAST
            LIMIT 1
            "#
        );

        sqlx::query_as::<_, ContainerRecord>(&query)
            .bind(owner_id)
            .bind(parse_id(id_or_name))
            .bind(id_or_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn get(&self, id: i64) -> Result<Option<ContainerRecord>, DbError> {
        let query = format!("SELECT {RECORD_COLUMNS} FROM containers WHERE id = $1");

        sqlx::query_as::<_, ContainerRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn update_status(
        &self,
        id: i64,
        status: ContainerStatus,
        message: &str,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE containers
            SET status = $2,
                message = CASE WHEN $2 = 'Error' THEN $3 ELSE '' END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;
        Ok(())
    }

    async fn set_runtime_id(&self, id: i64, runtime_id: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE containers SET runtime_id = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(runtime_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::from_write)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM containers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    async fn list_pending_or_failed(
        &self,
        owner_id: &str,
    ) -> Result<Vec<ContainerRecord>, DbError> {
        let query = format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM containers
            WHERE owner_id = $1
              AND status IN ('Waiting', 'ImagePulling', 'Creating', 'Error')
            ORDER BY id
            "#
        );

        sqlx::query_as::<_, ContainerRecord>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)
    }

    async fn set_default_shell(
        &self,
        owner_id: &str,
        id_or_name: &str,
        default_shell: Option<&str>,
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(id) FROM containers WHERE owner_id = $1 AND (id = $2 OR name = $3)",
        )
        .bind(owner_id)
        .bind(parse_id(id_or_name))
        .bind(id_or_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        if count == 0 {
            tx.rollback().await.map_err(DbError::Query)?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE containers
            SET default_shell = $4, updated_at = now()
            WHERE owner_id = $1 AND (id = $2 OR name = $3)
            "#,
        )
        .bind(owner_id)
        .bind(parse_id(id_or_name))
        .bind(id_or_name)
        .bind(default_shell)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        tx.commit().await.map_err(DbError::Query)?;
        Ok(true)
    }
}
