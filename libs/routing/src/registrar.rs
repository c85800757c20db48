//! Frontend/backend registration for the reverse proxy.

use std::fmt::Display;
use std::sync::Arc;

use tracing::debug;

use crate::error::{KvError, RoutingError};
use crate::kv::KvStore;

/// Server name used for the single upstream of every backend.
pub const DEFAULT_SERVER_NAME: &str = "main";

/// Frontend name for a container record id.
pub fn frontend_name(id: i64) -> String {
    format!("frontend_{id}")
}

/// Backend name for a container record id.
pub fn backend_name(id: i64) -> String {
    format!("backend_{id}")
}

/// Everything written for one frontend, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendSpec {
    /// Traefik matcher, e.g. `Host: web1.example.com`.
    pub rule: String,
    pub pass_host_header: bool,
    /// Written only when set (HTTPS deployments).
    pub ssl_redirect: Option<bool>,
    pub backend: String,
}

/// Writes and removes routing entries under a fixed prefix.
#[derive(Clone)]
pub struct RoutingRegistrar {
    kv: Arc<dyn KvStore>,
    prefix: String,
}

impl RoutingRegistrar {
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// The store this registrar writes to.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn frontend_root(&self, frontend: &str) -> String {
        format!("{}/frontends/{}/", self.prefix, frontend)
    }

    fn backend_root(&self, backend: &str) -> String {
        format!("{}/backends/{}/", self.prefix, backend)
    }

    fn server_url_key(&self, backend: &str, server: &str) -> String {
        format!("{}servers/{}/url", self.backend_root(backend), server)
    }

    /// Point `backend`/`server` at `address`.
    pub async fn upsert_backend(
        &self,
        backend: &str,
        server: &str,
        address: &str,
    ) -> Result<(), RoutingError> {
        validate(backend)?;
        validate(server)?;

        debug!(backend = %backend, address = %address, "Upserting backend");
        self.kv
            .put(&self.server_url_key(backend, server), address)
            .await?;
        Ok(())
    }

    /// Current address of `backend`/`server`, if registered.
    pub async fn backend_address(
        &self,
        backend: &str,
        server: &str,
    ) -> Result<Option<String>, RoutingError> {
        validate(backend)?;
        validate(server)?;
        Ok(self.kv.try_get(&self.server_url_key(backend, server)).await?)
    }

    /// Remove the whole backend subtree. Absent backends are not an error.
    pub async fn delete_backend(&self, backend: &str) -> Result<(), RoutingError> {
        validate(backend)?;

        debug!(backend = %backend, "Deleting backend");
        tolerate_not_found(self.kv.delete_tree(&self.backend_root(backend)).await)
    }

    /// Set the host-routing rule of `frontend`.
    pub async fn upsert_frontend_rule(
        &self,
        frontend: &str,
        rule: &str,
    ) -> Result<(), RoutingError> {
        self.set_frontend_option(frontend, &["routes", "host", "rule"], rule)
            .await
    }

    /// Put `value` at `<prefix>/frontends/<frontend>/<path...>`.
    pub async fn set_frontend_option(
        &self,
        frontend: &str,
        path: &[&str],
        value: impl Display + Send,
    ) -> Result<(), RoutingError> {
        validate(frontend)?;
        if path.is_empty() {
            return Err(RoutingError::InvalidName(String::new()));
        }
        for segment in path {
            validate(segment)?;
        }

        let key = format!("{}{}", self.frontend_root(frontend), path.join("/"));
        self.kv.put(&key, &value.to_string()).await?;
        Ok(())
    }

    /// Route `frontend` traffic to `backend`.
    pub async fn bind_frontend_to_backend(
        &self,
        frontend: &str,
        backend: &str,
    ) -> Result<(), RoutingError> {
        validate(backend)?;
        self.set_frontend_option(frontend, &["backend"], backend).await
    }

    /// Write every key of `spec` in order, stopping at the first failure.
    ///
    /// Keys written before a failure stay in place.
    pub async fn register_frontend(
        &self,
        frontend: &str,
        spec: &FrontendSpec,
    ) -> Result<(), RoutingError> {
        self.upsert_frontend_rule(frontend, &spec.rule).await?;
        self.set_frontend_option(frontend, &["passHostHeader"], spec.pass_host_header)
            .await?;
        if let Some(redirect) = spec.ssl_redirect {
            self.set_frontend_option(frontend, &["headers", "sslredirect"], redirect)
                .await?;
        }
        self.bind_frontend_to_backend(frontend, &spec.backend).await
    }

    /// Remove the whole frontend subtree. Absent frontends are not an error.
    pub async fn delete_frontend(&self, frontend: &str) -> Result<(), RoutingError> {
        validate(frontend)?;

        debug!(frontend = %frontend, "Deleting frontend");
        tolerate_not_found(self.kv.delete_tree(&self.frontend_root(frontend)).await)
    }

    /// Whether any key exists under the frontend.
    pub async fn frontend_exists(&self, frontend: &str) -> Result<bool, RoutingError> {
        validate(frontend)?;
        let keys = self.kv.list_keys(&self.frontend_root(frontend)).await?;
        Ok(!keys.is_empty())
    }
}

fn validate(name: &str) -> Result<(), RoutingError> {
    if name.is_empty() || name.contains('/') {
        return Err(RoutingError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn tolerate_not_found(result: Result<(), KvError>) -> Result<(), RoutingError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => Ok(other?),
    }
}
