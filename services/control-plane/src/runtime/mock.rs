//! Scriptable in-process runtime for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{
    ByteStream, ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, CopyOptions,
    ExecAttachment, ExecSpec, LogOptions, PathStat, PullProgress, RemoveOptions, RuntimeError,
    RuntimeEvent, DEFAULT_NETWORK,
};

/// How a mocked image pull ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// The last progress item carries this status.
    Completes(String),
    /// The stream yields this error.
    Fails(String),
}

impl Default for PullOutcome {
    fn default() -> Self {
        PullOutcome::Completes("Status: Downloaded newer image".to_string())
    }
}

#[derive(Debug, Clone)]
struct MockContainer {
    details: ContainerDetails,
    network: String,
    spec: Option<ContainerSpec>,
}

type EventSender = mpsc::UnboundedSender<Result<RuntimeEvent, RuntimeError>>;

#[derive(Default)]
struct MockState {
    pull: PullOutcome,
    fail_create: Option<String>,
    fail_exec: Option<String>,
    containers: HashMap<String, MockContainer>,
    subscribers: Vec<EventSender>,
    resizes: Vec<(String, u16, u16)>,
    missing_paths: HashSet<String>,
    files: HashMap<String, Bytes>,
    uploads: Vec<(String, String, CopyOptions)>,
    logs: HashMap<String, Vec<Bytes>>,
    removals: Vec<String>,
}

/// In-memory [`ContainerRuntime`].
///
/// Started containers get an address on their network and stopped ones lose
/// it. Start and stop also publish `start`/`die` events to every open event
/// stream. Exec sessions run a tiny line-based shell that answers
/// `echo <text>` with `<text>`.
pub struct MockRuntime {
    counter: AtomicU64,
    event_subscriptions: AtomicU64,
    state: Mutex<MockState>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            event_subscriptions: AtomicU64::new(0),
            state: Mutex::new(MockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_pull_outcome(&self, outcome: PullOutcome) {
        self.state().pull = outcome;
    }

    pub fn fail_create(&self, message: &str) {
        self.state().fail_create = Some(message.to_string());
    }

    /// Runtime ids passed to `remove_container`, in call order.
    pub fn remove_calls(&self) -> Vec<String> {
        self.state().removals.clone()
    }

    pub fn fail_exec(&self, message: &str) {
        self.state().fail_exec = Some(message.to_string());
    }

    /// Add a container directly, bypassing creation.
    pub fn insert_container(&self, details: ContainerDetails) {
        let id = details.id.clone();
        self.state().containers.insert(
            id,
            MockContainer {
                details,
                network: DEFAULT_NETWORK.to_string(),
                spec: None,
            },
        );
    }

    /// The spec a container was created from.
    pub fn created_spec(&self, id: &str) -> Option<ContainerSpec> {
        self.state().containers.get(id)?.spec.clone()
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn set_address(&self, id: &str, network: &str, address: Option<&str>) {
        if let Some(c) = self.state().containers.get_mut(id) {
            match address {
                Some(addr) => {
                    c.details
                        .network_addresses
                        .insert(network.to_string(), addr.to_string());
                }
                None => {
                    c.details.network_addresses.remove(network);
                }
            }
        }
    }

    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.details.state.running = running;
            c.details.state.status = if running { "running" } else { "exited" }.to_string();
        }
    }

    pub fn set_state_error(&self, id: &str, error: &str) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.details.state.error = error.to_string();
        }
    }

    /// Publish an event to every open event stream.
    pub fn emit(&self, action: &str, actor_id: &str) {
        let event = RuntimeEvent {
            kind: "container".to_string(),
            action: action.to_string(),
            actor_id: actor_id.to_string(),
        };
        self.state()
            .subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// End every open event stream, as a daemon restart would.
    pub fn close_event_streams(&self) {
        self.state().subscribers.clear();
    }

    /// Number of times [`ContainerRuntime::events`] was called.
    pub fn event_subscriptions(&self) -> u64 {
        self.event_subscriptions.load(Ordering::SeqCst)
    }

    /// Resize calls as `(exec_id, rows, cols)`.
    pub fn resize_calls(&self) -> Vec<(String, u16, u16)> {
        self.state().resizes.clone()
    }

    pub fn mark_path_missing(&self, path: &str) {
        self.state().missing_paths.insert(path.to_string());
    }

    pub fn put_file(&self, path: &str, archive: Bytes) {
        self.state().files.insert(path.to_string(), archive);
    }

    /// Uploads as `(container_id, path, options)`.
    pub fn uploads(&self) -> Vec<(String, String, CopyOptions)> {
        self.state().uploads.clone()
    }

    pub fn set_logs(&self, id: &str, chunks: Vec<Bytes>) {
        self.state().logs.insert(id.to_string(), chunks);
    }

    fn next_id(&self, prefix: &str) -> (u64, String) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        (n, format!("{prefix}{n:012x}"))
    }

    fn require(&self, id: &str) -> Result<(), RuntimeError> {
        if self.state().containers.contains_key(id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(format!("No such container: {id}")))
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(
        &self,
        image: &str,
    ) -> Result<BoxStream<'static, Result<PullProgress, RuntimeError>>, RuntimeError> {
        debug!(image = %image, "[MOCK] Pulling image");
        let first = Ok(PullProgress {
            status: Some(format!("Pulling from library/{image}")),
        });
        let last = match self.state().pull.clone() {
            PullOutcome::Completes(status) => Ok(PullProgress {
                status: Some(status),
            }),
            PullOutcome::Fails(error) => Err(RuntimeError::Protocol(error)),
        };
        Ok(stream::iter(vec![first, last]).boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        if let Some(message) = self.state().fail_create.clone() {
            return Err(RuntimeError::Api {
                status: 500,
                message,
            });
        }

        let (_, id) = self.next_id("c");
        let details = ContainerDetails {
            id: id.clone(),
            created: "2024-01-01T00:00:00Z".to_string(),
            path: spec.cmd.first().cloned().unwrap_or_default(),
            args: spec.cmd.iter().skip(1).cloned().collect(),
            image: spec.image.clone(),
            image_id: format!("sha256:{}", spec.image),
            labels: spec.labels.clone(),
            state: super::RuntimeState {
                status: "created".to_string(),
                ..Default::default()
            },
            network_addresses: HashMap::new(),
            volumes: spec.volumes.clone(),
        };

        self.state().containers.insert(
            id.clone(),
            MockContainer {
                details,
                network: spec
                    .network
                    .clone()
                    .unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
                spec: Some(spec.clone()),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.require(id)?;
        let (n, _) = self.next_id("");
        {
            let mut state = self.state();
            if let Some(c) = state.containers.get_mut(id) {
                c.details.state.running = true;
                c.details.state.status = "running".to_string();
                let network = c.network.clone();
                c.details
                    .network_addresses
                    .entry(network)
                    .or_insert_with(|| format!("172.17.0.{}", n % 250 + 2));
            }
        }
        self.emit("start", id);
        Ok(())
    }

    async fn stop_container(&self, id: &str, _grace_secs: i64) -> Result<(), RuntimeError> {
        self.require(id)?;
        {
            let mut state = self.state();
            if let Some(c) = state.containers.get_mut(id) {
                c.details.state.running = false;
                c.details.state.status = "exited".to_string();
                c.details.network_addresses.clear();
            }
        }
        self.emit("die", id);
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state();
        state.removals.push(id.to_string());
        let running = match state.containers.get(id) {
            Some(c) => c.details.state.running,
            None => return Err(RuntimeError::NotFound(format!("No such container: {id}"))),
        };
        if running && !options.force {
            return Err(RuntimeError::Api {
                status: 409,
                message: format!(
                    "You cannot remove a running container {id}. Stop the container before \
                     attempting removal or force remove"
                ),
            });
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        self.state()
            .containers
            .get(id)
            .map(|c| c.details.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("No such container: {id}")))
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let (key, value) = label.split_once('=').unwrap_or((label, ""));
        let state = self.state();
        let mut containers: Vec<ContainerSummary> = state
            .containers
            .values()
            .filter(|c| match c.details.labels.get(key) {
                Some(v) => value.is_empty() || v == value,
                None => false,
            })
            .map(|c| ContainerSummary {
                id: c.details.id.clone(),
                names: vec![format!("/{}", c.details.id)],
                image: c.details.image.clone(),
                image_id: c.details.image_id.clone(),
                command: c.details.path.clone(),
                created: 1_704_067_200,
                labels: c.details.labels.clone(),
                state: c.details.state.status.clone(),
                volumes: c.details.volumes.clone(),
            })
            .collect();
        containers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(containers)
    }

    async fn events(
        &self,
    ) -> Result<BoxStream<'static, Result<RuntimeEvent, RuntimeError>>, RuntimeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(tx);
        self.event_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn exec_attach(
        &self,
        id: &str,
        spec: &ExecSpec,
    ) -> Result<ExecAttachment, RuntimeError> {
        if let Some(message) = self.state().fail_exec.clone() {
            return Err(RuntimeError::Api {
                status: 500,
                message,
            });
        }
        self.require(id)?;

        let (_, exec_id) = self.next_id("e");
        let (client, server) = tokio::io::duplex(4096);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        debug!(exec_id = %exec_id, cmd = ?spec.cmd, "[MOCK] Attaching exec");
        tokio::spawn(async move {
            let mut lines = BufReader::new(server).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match line.strip_prefix("echo ") {
                    Some(text) => format!("{text}\n"),
                    None => format!("{line}\n"),
                };
                if out_tx.send(Ok(Bytes::from(reply))).is_err() {
                    break;
                }
            }
        });

        Ok(ExecAttachment {
            exec_id,
            output: UnboundedReceiverStream::new(out_rx).boxed(),
            input: Box::pin(client),
        })
    }

    async fn exec_resize(&self, exec_id: &str, rows: u16, cols: u16) -> Result<(), RuntimeError> {
        self.state()
            .resizes
            .push((exec_id.to_string(), rows, cols));
        Ok(())
    }

    async fn copy_to(
        &self,
        id: &str,
        path: &str,
        mut archive: ByteStream,
        options: CopyOptions,
    ) -> Result<(), RuntimeError> {
        self.require(id)?;
        let mut received = Vec::new();
        while let Some(chunk) = archive.next().await {
            received.extend_from_slice(&chunk?);
        }
        let archive = Bytes::from(received);

        let mut state = self.state();
        if state.missing_paths.contains(path) {
            return Err(RuntimeError::NotFound(format!(
                "Could not find the file {path} in container {id}"
            )));
        }
        state.files.insert(path.to_string(), archive);
        state
            .uploads
            .push((id.to_string(), path.to_string(), options));
        Ok(())
    }

    async fn copy_from(&self, id: &str, path: &str) -> Result<ByteStream, RuntimeError> {
        self.require(id)?;
        let archive = self.state().files.get(path).cloned().ok_or_else(|| {
            RuntimeError::NotFound(format!("Could not find the file {path} in container {id}"))
        })?;
        Ok(stream::iter(vec![Ok(archive)]).boxed())
    }

    async fn stat_path(&self, id: &str, path: &str) -> Result<PathStat, RuntimeError> {
        self.require(id)?;
        let state = self.state();
        let archive = state.files.get(path).ok_or_else(|| {
            RuntimeError::NotFound(format!("Could not find the file {path} in container {id}"))
        })?;
        Ok(PathStat {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            size: archive.len() as i64,
            mode: 0o644,
            mtime: "2024-01-01T00:00:00Z".to_string(),
            link_target: String::new(),
        })
    }

    async fn logs(&self, id: &str, _options: &LogOptions) -> Result<ByteStream, RuntimeError> {
        self.require(id)?;
        let chunks = self.state().logs.get(id).cloned().unwrap_or_default();
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}
