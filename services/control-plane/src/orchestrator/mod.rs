//! Container lifecycle orchestration.
//!
//! [`ContainerOrchestrator`] ties the record store, the runtime and the
//! routing registrar together. Lookups are always scoped to the calling
//! owner and accept either the numeric id or the name.

mod create;
mod error;
pub mod settings;
mod views;

use std::collections::HashSet;
use std::sync::Arc;

use berth_routing::{backend_name, frontend_name, KvStore, RoutingRegistrar};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::db::{ContainerRecord, ContainerStatus, ContainerStore};
use crate::reconciler::Reconciler;
use crate::runtime::{
    ByteStream, ContainerRuntime, CopyOptions, ExecSpec, LogOptions, PathStat, RemoveOptions,
    LABEL_OWNER,
};

pub use create::{pull_succeeded, validate_name, CreateRequest, CreatedContainer};
pub use error::OrchestratorError;
pub use views::{status_from_runtime, InspectView, ListEntry};

/// Grace period before a stopping container is killed.
pub const STOP_GRACE_SECS: i64 = 15;

/// Shell used when nothing else is configured.
pub const FALLBACK_SHELL: &str = "sh";

/// Settings fixed at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Public domain; containers are served at `<name>.<public_addr>`.
    pub public_addr: String,
    pub https: bool,
    /// Runtime network containers join; `None` for the default bridge.
    pub network: Option<String>,
    /// Last-resort exec shell from the environment.
    pub default_shell: Option<String>,
}

/// Per-container settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub default_shell: Option<String>,
}

/// Download metadata plus the archive stream.
pub struct Download {
    pub stat: PathStat,
    pub archive: ByteStream,
}

/// Pick the exec command: the request, else the container's default shell,
/// else the user's, else the environment's, else `sh`.
pub fn resolve_command(
    requested: Vec<String>,
    container_shell: Option<&str>,
    user_shell: Option<&str>,
    env_shell: Option<&str>,
) -> Vec<String> {
    if !requested.is_empty() {
        return requested;
    }
    let shell = [container_shell, user_shell, env_shell]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or(FALLBACK_SHELL);
    vec![shell.to_string()]
}

#[derive(Clone)]
pub struct ContainerOrchestrator {
    store: Arc<dyn ContainerStore>,
    runtime: Arc<dyn ContainerRuntime>,
    routing: RoutingRegistrar,
    reconciler: Reconciler,
    config: Arc<OrchestratorConfig>,
}

impl ContainerOrchestrator {
    pub fn new(
        store: Arc<dyn ContainerStore>,
        runtime: Arc<dyn ContainerRuntime>,
        routing: RoutingRegistrar,
        config: OrchestratorConfig,
    ) -> Self {
        let reconciler = Reconciler::new(
            store.clone(),
            runtime.clone(),
            routing.clone(),
            config.network.clone(),
        );
        Self {
            store,
            runtime,
            routing,
            reconciler,
            config: Arc::new(config),
        }
    }

    /// The reconciler shared with the event loop.
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    async fn record(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<ContainerRecord, OrchestratorError> {
        self.store
            .find(owner_id, id_or_name)
            .await?
            .ok_or_else(|| OrchestratorError::container_not_found(id_or_name))
    }

    /// The record and its runtime id; NotFound when the runtime does not
    /// know the container yet.
    async fn created_record(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<(ContainerRecord, String), OrchestratorError> {
        let record = self.record(owner_id, id_or_name).await?;
        match record.runtime_id.clone() {
            Some(runtime_id) => Ok((record, runtime_id)),
            None => Err(OrchestratorError::container_not_found(id_or_name)),
        }
    }

    /// Remove a container, its record and its routes.
    ///
    /// Records in `Error` skip the runtime call, as do records the runtime
    /// never created.
    #[instrument(skip(self))]
    pub async fn remove(
        &self,
        owner_id: &str,
        id_or_name: &str,
        force: bool,
    ) -> Result<(), OrchestratorError> {
        let record = self.record(owner_id, id_or_name).await?;

        if record.status != ContainerStatus::Error {
            if let Some(runtime_id) = &record.runtime_id {
                let options = RemoveOptions {
                    remove_volumes: true,
                    force,
                };
                match self.runtime.remove_container(runtime_id, options).await {
                    Ok(()) => {}
                    Err(e) if e.is_running_container() => {
                        return Err(OrchestratorError::RunningContainer(record.name))
                    }
                    Err(e) if e.is_not_found() => {
                        warn!(container_id = record.id, runtime_id = %runtime_id, "Runtime container already gone");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.store.delete(record.id).await?;

        // Both deletes are attempted even if the first fails.
        let backend = self.routing.delete_backend(&backend_name(record.id)).await;
        let frontend = self.routing.delete_frontend(&frontend_name(record.id)).await;
        backend?;
        frontend?;

        info!(container_id = record.id, "Container removed");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn start(&self, owner_id: &str, id_or_name: &str) -> Result<(), OrchestratorError> {
        let (_, runtime_id) = self.created_record(owner_id, id_or_name).await?;
        self.runtime.start_container(&runtime_id).await?;
        self.reconciler.reconcile(&runtime_id).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn stop(&self, owner_id: &str, id_or_name: &str) -> Result<(), OrchestratorError> {
        let (_, runtime_id) = self.created_record(owner_id, id_or_name).await?;
        self.runtime
            .stop_container(&runtime_id, STOP_GRACE_SECS)
            .await?;
        self.reconciler.reconcile(&runtime_id).await?;
        Ok(())
    }

    pub async fn inspect(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<InspectView, OrchestratorError> {
        let record = self.record(owner_id, id_or_name).await?;
        let runtime_id = match &record.runtime_id {
            Some(runtime_id)
                if record.status != ContainerStatus::Error && !record.status.is_pending() =>
            {
                runtime_id
            }
            _ => return Ok(InspectView::from_record(&record)),
        };

        let details = self.runtime.inspect_container(runtime_id).await?;
        Ok(InspectView::from_runtime(&record, details))
    }

    /// Pending and failed records from the store, then the owner's runtime
    /// containers.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ListEntry>, OrchestratorError> {
        let mut entries: Vec<ListEntry> = self
            .store
            .list_pending_or_failed(owner_id)
            .await?
            .iter()
            .map(ListEntry::from_record)
            .collect();
        let mut seen: HashSet<i64> = entries.iter().map(|e| e.id).collect();

        let containers = self
            .runtime
            .list_containers(&format!("{LABEL_OWNER}={owner_id}"))
            .await?;
        for summary in containers {
            if let Some(entry) = ListEntry::from_runtime(summary) {
                if seen.insert(entry.id) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    /// Extract a tar archive at `path` inside the container.
    pub async fn upload(
        &self,
        owner_id: &str,
        id_or_name: &str,
        path: &str,
        archive: ByteStream,
        options: CopyOptions,
    ) -> Result<(), OrchestratorError> {
        let (_, runtime_id) = self.created_record(owner_id, id_or_name).await?;
        match self
            .runtime
            .copy_to(&runtime_id, path, archive, options)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() || e.to_string().to_lowercase().contains("not found") => {
                Err(OrchestratorError::NotFound(format!(
                    "path {path} does not exist"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn stat(
        &self,
        owner_id: &str,
        id_or_name: &str,
        path: &str,
    ) -> Result<PathStat, OrchestratorError> {
        let (_, runtime_id) = self.created_record(owner_id, id_or_name).await?;
        Ok(self.runtime.stat_path(&runtime_id, path).await?)
    }

    /// Stream `path` out of the container as a tar archive.
    pub async fn download(
        &self,
        owner_id: &str,
        id_or_name: &str,
        path: &str,
    ) -> Result<Download, OrchestratorError> {
        let (_, runtime_id) = self.created_record(owner_id, id_or_name).await?;
        let stat = self.runtime.stat_path(&runtime_id, path).await?;
        let archive = self.runtime.copy_from(&runtime_id, path).await?;
        Ok(Download { stat, archive })
    }

    pub async fn get_config(
        &self,
        owner_id: &str,
        id_or_name: &str,
    ) -> Result<ContainerConfig, OrchestratorError> {
        let record = self.record(owner_id, id_or_name).await?;
        Ok(ContainerConfig {
            default_shell: record.default_shell,
        })
    }

    pub async fn set_config(
        &self,
        owner_id: &str,
        id_or_name: &str,
        config: &ContainerConfig,
    ) -> Result<(), OrchestratorError> {
        let updated = self
            .store
            .set_default_shell(owner_id, id_or_name, config.default_shell.as_deref())
            .await?;
        if updated {
            Ok(())
        } else {
            Err(OrchestratorError::container_not_found(id_or_name))
        }
    }

    /// The runtime id and resolved exec spec for an exec session.
    pub async fn prepare_exec(
        &self,
        owner_id: &str,
        id_or_name: &str,
        command: Vec<String>,
        tty: bool,
    ) -> Result<(String, ExecSpec), OrchestratorError> {
        let (record, runtime_id) = self.created_record(owner_id, id_or_name).await?;

        let container_shell = record
            .default_shell
            .as_deref()
            .filter(|s| !s.trim().is_empty());
        let user_shell = if command.is_empty() && container_shell.is_none() {
            self.user_default_shell(owner_id).await?
        } else {
            None
        };
        let cmd = resolve_command(
            command,
            container_shell,
            user_shell.as_deref(),
            self.config.default_shell.as_deref(),
        );

        Ok((runtime_id, ExecSpec { cmd, tty }))
    }

    pub async fn open_logs(
        &self,
        owner_id: &str,
        id_or_name: &str,
        options: &LogOptions,
    ) -> Result<ByteStream, OrchestratorError> {
        let (_, runtime_id) = self.created_record(owner_id, id_or_name).await?;
        Ok(self.runtime.logs(&runtime_id, options).await?)
    }

    pub async fn user_default_shell(
        &self,
        owner_id: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        let key = settings::user_default_shell_key(owner_id);
        let shell = self
            .routing
            .kv()
            .try_get(&key)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("settings store: {e}")))?;
        Ok(shell.filter(|s| !s.trim().is_empty()))
    }

    pub async fn set_user_default_shell(
        &self,
        owner_id: &str,
        shell: &str,
    ) -> Result<(), OrchestratorError> {
        if shell.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "default shell must not be empty".to_string(),
            ));
        }
        let key = settings::user_default_shell_key(owner_id);
        self.routing
            .kv()
            .put(&key, shell.trim())
            .await
            .map_err(|e| OrchestratorError::Internal(format!("settings store: {e}")))
    }
}
