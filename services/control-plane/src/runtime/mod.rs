//! Container runtime interface.
//!
//! The orchestrator, the reconciler and the exec/log bridges only talk to the
//! runtime through [`ContainerRuntime`]. [`DockerRuntime`] drives a local
//! Docker daemon; [`MockRuntime`] is a scriptable in-process double.

mod docker;
mod mock;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWrite;

pub use docker::DockerRuntime;
pub use mock::{MockRuntime, PullOutcome};

/// Label carrying the container record id.
pub const LABEL_ID: &str = "dev.berth.id";
/// Label carrying the owning user.
pub const LABEL_OWNER: &str = "dev.berth.owner";
/// Label carrying the container name.
pub const LABEL_NAME: &str = "dev.berth.name";

/// Network used when none is configured.
pub const DEFAULT_NETWORK: &str = "bridge";

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("runtime responded {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    /// Whether the runtime refused to remove a container because it runs.
    pub fn is_running_container(&self) -> bool {
        self.to_string()
            .to_lowercase()
            .contains("cannot remove a running container")
    }
}

/// One item of an image pull progress stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub status: Option<String>,
}

/// Resource caps applied at container creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_period: Option<i64>,
    pub cpu_quota: Option<i64>,
    /// Memory limit in bytes.
    pub memory: Option<i64>,
    /// Passed verbatim as the `size` storage option.
    pub storage_size: Option<String>,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: Vec<String>,
    /// Container paths to declare as volumes.
    pub volumes: Vec<String>,
    pub working_dir: Option<String>,
    pub labels: HashMap<String, String>,
    pub limits: ResourceLimits,
    /// Network to attach to; `None` leaves the runtime default.
    pub network: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub remove_volumes: bool,
    pub force: bool,
}

/// Low-level state reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: String,
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub oom_killed: bool,
    pub dead: bool,
    pub pid: i64,
    pub exit_code: i64,
    pub error: String,
    pub started_at: String,
    pub finished_at: String,
}

/// Result of inspecting one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    pub created: String,
    pub path: String,
    pub args: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub labels: HashMap<String, String>,
    pub state: RuntimeState,
    /// IP address per attached network.
    pub network_addresses: HashMap<String, String>,
    pub volumes: Vec<String>,
}

impl ContainerDetails {
    /// Record id carried in the container labels, if this container is ours.
    pub fn record_id(&self) -> Option<i64> {
        self.labels.get(LABEL_ID)?.parse().ok()
    }

    /// Non-empty address on `network`.
    pub fn address_on(&self, network: &str) -> Option<&str> {
        self.network_addresses
            .get(network)
            .map(String::as_str)
            .filter(|addr| !addr.is_empty())
    }
}

/// One entry of a container listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub command: String,
    pub created: i64,
    pub labels: HashMap<String, String>,
    pub state: String,
    pub volumes: Vec<String>,
}

/// A runtime lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    /// Object type, e.g. `container` or `network`.
    pub kind: String,
    pub action: String,
    pub actor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub tty: bool,
}

/// An attached exec instance.
pub struct ExecAttachment {
    pub exec_id: String,
    /// Combined stdout/stderr, already demultiplexed.
    pub output: BoxStream<'static, Result<Bytes, RuntimeError>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for ExecAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecAttachment")
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

/// Flags for copying an archive into a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Allow a directory to be replaced by a file and vice versa.
    pub allow_overwrite: bool,
    pub copy_uid_gid: bool,
}

/// Metadata of a path inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStat {
    pub name: String,
    pub size: i64,
    pub mode: u32,
    pub mtime: String,
    #[serde(rename = "linkTarget")]
    pub link_target: String,
}

/// Options for reading container logs. Timestamps are unix seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
    pub follow: bool,
    pub timestamps: bool,
    pub tail: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, RuntimeError>>;

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, yielding progress until the pull ends.
    async fn pull_image(
        &self,
        image: &str,
    ) -> Result<BoxStream<'static, Result<PullProgress, RuntimeError>>, RuntimeError>;

    /// Create a container and return its runtime id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a container. Already started is not an error.
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, options: RemoveOptions)
        -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError>;

    /// List all containers carrying `label` (`key=value`).
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, RuntimeError>;

    /// Subscribe to every runtime event.
    async fn events(&self)
        -> Result<BoxStream<'static, Result<RuntimeEvent, RuntimeError>>, RuntimeError>;

    /// Create an exec instance and attach to it.
    async fn exec_attach(&self, id: &str, spec: &ExecSpec)
        -> Result<ExecAttachment, RuntimeError>;

    async fn exec_resize(&self, exec_id: &str, rows: u16, cols: u16) -> Result<(), RuntimeError>;

    /// Extract a tar archive at `path` inside the container.
    async fn copy_to(
        &self,
        id: &str,
        path: &str,
        archive: ByteStream,
        options: CopyOptions,
    ) -> Result<(), RuntimeError>;

    /// Stream `path` out of the container as a tar archive.
    async fn copy_from(&self, id: &str, path: &str) -> Result<ByteStream, RuntimeError>;

    async fn stat_path(&self, id: &str, path: &str) -> Result<PathStat, RuntimeError>;

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<ByteStream, RuntimeError>;
}
