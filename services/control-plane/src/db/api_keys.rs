//! API key storage.
//!
//! Each owner has at most one key. Issuing runs as a get-or-create inside a
//! single transaction so concurrent first requests converge on one key.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use sqlx::postgres::PgPool;

use super::DbError;

/// Prefix of every issued key.
pub const API_KEY_PREFIX: &str = "bk_";

const API_KEY_BYTES: usize = 32;

/// Generate a new random API key.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    rand::rng().fill(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Return the owner's key, creating one if none exists.
    async fn get_or_create(&self, owner_id: &str) -> Result<String, DbError>;

    /// Replace the owner's key with a fresh one, creating it if absent.
    async fn reissue(&self, owner_id: &str) -> Result<String, DbError>;

    /// Resolve a presented key to its owner.
    async fn resolve(&self, api_key: &str) -> Result<Option<String>, DbError>;
}

/// Postgres-backed [`ApiKeyStore`].
#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: PgPool,
}

impl PgApiKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn get_or_create(&self, owner_id: &str) -> Result<String, DbError> {
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT api_key FROM api_keys WHERE owner_id = $1 FOR UPDATE")
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DbError::Query)?;

        if let Some(key) = existing {
            tx.commit().await.map_err(DbError::Query)?;
            return Ok(key);
        }

        // Concurrent first requests race here; the first insert wins.
        sqlx::query(
            r#"
            INSERT INTO api_keys (owner_id, api_key)
            VALUES ($1, $2)
            ON CONFLICT (owner_id) DO NOTHING
            "#,
        )
        .bind(owner_id)
        .bind(generate_api_key())
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?;

        let key: String = sqlx::query_scalar("SELECT api_key FROM api_keys WHERE owner_id = $1")
            .bind(owner_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        tx.commit().await.map_err(DbError::Query)?;
        Ok(key)
    }

    async fn reissue(&self, owner_id: &str) -> Result<String, DbError> {
        let key = generate_api_key();
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        let updated = sqlx::query(
            "UPDATE api_keys SET api_key = $2, updated_at = now() WHERE owner_id = $1",
        )
        .bind(owner_id)
        .bind(&key)
        .execute(&mut *tx)
        .await
        .map_err(DbError::Query)?
        .rows_affected();

        if updated == 0 {
            sqlx::query(
                r#"
                INSERT INTO api_keys (owner_id, api_key)
                VALUES ($1, $2)
                ON CONFLICT (owner_id) DO UPDATE SET api_key = EXCLUDED.api_key, updated_at = now()
                "#,
            )
            .bind(owner_id)
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;
        }

        tx.commit().await.map_err(DbError::Query)?;
        Ok(key)
    }

    async fn resolve(&self, api_key: &str) -> Result<Option<String>, DbError> {
        sqlx::query_scalar("SELECT owner_id FROM api_keys WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::Query)
    }
}
