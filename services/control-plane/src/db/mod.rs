//! Persistence for container records and API keys.
//!
//! Both stores sit behind traits so the orchestrator and the HTTP layer can
//! run against Postgres in production and the in-memory stores in tests.

mod api_keys;
mod containers;
mod error;
mod memory;

pub use api_keys::{generate_api_key, ApiKeyStore, PgApiKeyStore, API_KEY_PREFIX};
pub use containers::{ContainerRecord, ContainerStatus, ContainerStore, PgContainerStore};
pub use error::DbError;
pub use memory::{MemoryApiKeyStore, MemoryContainerStore};

use std::path::PathBuf;
use std::time::Duration;

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/berth";

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl DbConfig {
    /// Read `DATABASE_URL`, `DB_MAX_CONNECTIONS` and `DB_MIN_CONNECTIONS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections: env_parsed("DB_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            min_connections: env_parsed("DB_MIN_CONNECTIONS").unwrap_or(defaults.min_connections),
            ..defaults
        }
    }
}

/// Postgres pool plus store constructors.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply the SQL files under `migrations/`.
    ///
    /// The directory is looked up relative to the working directory first,
    /// then next to this crate's manifest.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let candidates = [
            PathBuf::from("migrations"),
            PathBuf::from("services/control-plane/migrations"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];

        let mut last_error = None;
        for dir in &candidates {
            match Migrator::new(dir.as_path()).await {
                Ok(migrator) => {
                    info!(dir = %dir.display(), "Applying migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    return Ok(());
                }
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "No migrations here");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(DbError::MigrationDirNotFound {
            tried: candidates
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            last_error: last_error.unwrap_or_default(),
        })
    }

    pub fn container_store(&self) -> PgContainerStore {
        PgContainerStore::new(self.pool.clone())
    }

    pub fn api_key_store(&self) -> PgApiKeyStore {
        PgApiKeyStore::new(self.pool.clone())
    }
}
