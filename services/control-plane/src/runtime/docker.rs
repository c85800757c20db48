//! Docker implementation of [`ContainerRuntime`].
//!
//! Everything goes through `bollard` except path stat, which the Docker API
//! only exposes as a response header of `HEAD /containers/{id}/archive`. That
//! request is issued directly over the unix socket with `hyperlocal`.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bollard::container::LogOutput;
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::models::{ContainerCreateBody, EndpointSettings, HostConfig, NetworkingConfig};
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptionsBuilder, DownloadFromContainerOptionsBuilder,
    EventsOptions, InspectContainerOptions, ListContainersOptionsBuilder, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    UploadToContainerOptionsBuilder,
};
use bollard::{body_try_stream, ClientVersion, Docker};
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{BoxStream, StreamExt};
use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use tracing::debug;

use super::{
    ByteStream, ContainerDetails, ContainerRuntime, ContainerSpec, ContainerSummary, CopyOptions,
    ExecAttachment, ExecSpec, LogOptions, PathStat, PullProgress, RemoveOptions, RuntimeError,
    RuntimeEvent, RuntimeState,
};

const PATH_STAT_HEADER: &str = "X-Docker-Container-Path-Stat";

/// Runtime backed by a local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    http: Client<UnixConnector>,
    socket_path: String,
    api_version: String,
}

impl DockerRuntime {
    /// Connect to the daemon at `socket_path` speaking API `api_version`
    /// (`major.minor`).
    pub fn connect(
        socket_path: &str,
        api_version: &str,
        timeout_secs: u64,
    ) -> Result<Self, RuntimeError> {
        let version = parse_api_version(api_version)?;
        let docker = Docker::connect_with_unix(socket_path, timeout_secs, &version)
            .map_err(map_err)?;

        Ok(Self {
            docker,
            http: Client::unix(),
            socket_path: socket_path.trim_start_matches("unix://").to_string(),
            api_version: api_version.to_string(),
        })
    }
}

fn parse_api_version(version: &str) -> Result<ClientVersion, RuntimeError> {
    let invalid = || RuntimeError::Protocol(format!("invalid API version {version:?}"));
    let (major, minor) = version
        .trim_start_matches('v')
        .split_once('.')
        .ok_or_else(invalid)?;

    Ok(ClientVersion {
        major_version: major.parse().map_err(|_| invalid())?,
        minor_version: minor.parse().map_err(|_| invalid())?,
    })
}

/// Split an image reference into repository and tag, defaulting to `latest`.
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn map_err(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status: status_code,
            message,
        },
        BollardError::DockerStreamError { error } => RuntimeError::Protocol(error),
        BollardError::JsonDataError { message, .. } => RuntimeError::Protocol(message),
        other => RuntimeError::Transport(other.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(
        &self,
        image: &str,
    ) -> Result<BoxStream<'static, Result<PullProgress, RuntimeError>>, RuntimeError> {
        let (repo, tag) = split_image_ref(image);
        let options = CreateImageOptionsBuilder::new()
            .from_image(repo)
            .tag(tag)
            .build();

        debug!(image = %image, "Pulling image");
        let stream = self
            .docker
            .create_image(Some(options), None, None)
            .map(|item| match item {
                Ok(info) => match info.error {
                    Some(error) => Err(RuntimeError::Protocol(error)),
                    None => Ok(PullProgress {
                        status: info.status,
                    }),
                },
                Err(e) => Err(map_err(e)),
            });
        Ok(stream.boxed())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let storage_opt = spec
            .limits
            .storage_size
            .as_ref()
            .map(|size| HashMap::from([("size".to_string(), size.clone())]));

        let host_config = HostConfig {
            cpu_period: spec.limits.cpu_period,
            cpu_quota: spec.limits.cpu_quota,
            memory: spec.limits.memory,
            storage_opt,
            network_mode: spec.network.clone(),
            ..Default::default()
        };

        let networking_config = spec.network.as_ref().map(|network| NetworkingConfig {
            endpoints_config: Some(HashMap::from([(
                network.clone(),
                EndpointSettings::default(),
            )])),
        });

        let volumes = (!spec.volumes.is_empty()).then(|| {
            spec.volumes
                .iter()
                .map(|v| (v.clone(), HashMap::new()))
                .collect()
        });

        let body = ContainerCreateBody {
            image: Some(spec.image.clone()),
            cmd: (!spec.cmd.is_empty()).then(|| spec.cmd.clone()),
            entrypoint: (!spec.entrypoint.is_empty()).then(|| spec.entrypoint.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            volumes,
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            networking_config,
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
            .map_err(map_err)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .start_container(id, None::<StartContainerOptions>)
            .await
        {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), RuntimeError> {
        let options = StopContainerOptionsBuilder::new()
            .t(grace_secs as i32)
            .build();
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(map_err)
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptionsBuilder::new()
            .v(options.remove_volumes)
            .force(options.force)
            .build();
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_err)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;

        let config = response.config.unwrap_or_default();
        let state = response.state.unwrap_or_default();
        let network_addresses = response
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.ip_address.unwrap_or_default()))
            .collect();

        Ok(ContainerDetails {
            id: response.id.unwrap_or_default(),
            created: response.created.map(|c| c.to_string()).unwrap_or_default(),
            path: response.path.unwrap_or_default(),
            args: response.args.unwrap_or_default(),
            image: config.image.unwrap_or_default(),
            image_id: response.image.unwrap_or_default(),
            labels: config.labels.unwrap_or_default(),
            state: RuntimeState {
                status: state.status.map(|s| s.to_string()).unwrap_or_default(),
                running: state.running.unwrap_or_default(),
                paused: state.paused.unwrap_or_default(),
                restarting: state.restarting.unwrap_or_default(),
                oom_killed: state.oom_killed.unwrap_or_default(),
                dead: state.dead.unwrap_or_default(),
                pid: state.pid.unwrap_or_default(),
                exit_code: state.exit_code.unwrap_or_default(),
                error: state.error.unwrap_or_default(),
                started_at: state.started_at.unwrap_or_default(),
                finished_at: state.finished_at.unwrap_or_default(),
            },
            network_addresses,
            volumes: config
                .volumes
                .map(|v| v.into_keys().collect())
                .unwrap_or_default(),
        })
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let filters = HashMap::from([("label", vec![label])]);
        let options = ListContainersOptionsBuilder::new()
            .all(true)
            .filters(&filters)
            .build();

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerSummary {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                image_id: c.image_id.unwrap_or_default(),
                command: c.command.unwrap_or_default(),
                created: c.created.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                volumes: c
                    .mounts
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.destination)
                    .collect(),
            })
            .collect())
    }

    async fn events(
        &self,
    ) -> Result<BoxStream<'static, Result<RuntimeEvent, RuntimeError>>, RuntimeError> {
        let stream = self
            .docker
            .events(None::<EventsOptions>)
            .map(|item| {
                let event = item.map_err(map_err)?;
                Ok(RuntimeEvent {
                    kind: event.typ.map(|t| t.to_string()).unwrap_or_default(),
                    action: event.action.unwrap_or_default(),
                    actor_id: event.actor.and_then(|a| a.id).unwrap_or_default(),
                })
            });
        Ok(stream.boxed())
    }

    async fn exec_attach(
        &self,
        id: &str,
        spec: &ExecSpec,
    ) -> Result<ExecAttachment, RuntimeError> {
        let created = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(spec.tty),
                    cmd: Some(spec.cmd.clone()),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)?;

        let started = self
            .docker
            .start_exec(
                &created.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: spec.tty,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(map_err)?;

        match started {
            StartExecResults::Attached { output, input } => Ok(ExecAttachment {
                exec_id: created.id,
                output: output
                    .map(|chunk| chunk.map(|c| c.into_bytes()).map_err(map_err))
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => Err(RuntimeError::Protocol(
                "exec started detached".to_string(),
            )),
        }
    }

    async fn exec_resize(&self, exec_id: &str, rows: u16, cols: u16) -> Result<(), RuntimeError> {
        self.docker
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(map_err)
    }

    async fn copy_to(
        &self,
        id: &str,
        path: &str,
        archive: ByteStream,
        options: CopyOptions,
    ) -> Result<(), RuntimeError> {
        let options = UploadToContainerOptionsBuilder::new()
            .path(path)
            .no_overwrite_dir_non_dir(if options.allow_overwrite { "false" } else { "true" })
            .copy_uidgid(if options.copy_uid_gid { "true" } else { "false" })
            .build();

        let archive = archive.map(|chunk| chunk.map_err(std::io::Error::other));
        self.docker
            .upload_to_container(id, Some(options), body_try_stream(archive))
            .await
            .map_err(map_err)
    }

    async fn copy_from(&self, id: &str, path: &str) -> Result<ByteStream, RuntimeError> {
        let options = DownloadFromContainerOptionsBuilder::new().path(path).build();
        let stream = self
            .docker
            .download_from_container(id, Some(options))
            .map(|chunk| chunk.map_err(map_err));
        Ok(stream.boxed())
    }

    async fn stat_path(&self, id: &str, path: &str) -> Result<PathStat, RuntimeError> {
        let endpoint = format!(
            "/v{}/containers/{}/archive?path={}",
            self.api_version,
            id,
            urlencoding::encode(path)
        );
        let request = Request::builder()
            .method(Method::HEAD)
            .uri(Uri::new(&self.socket_path, &endpoint))
            .body(Body::empty())
            .map_err(|e| RuntimeError::Protocol(e.to_string()))?;

        let response = self
            .http
            .request(request)
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(RuntimeError::NotFound(format!("{path} in container {id}")));
        }
        if !status.is_success() {
            return Err(RuntimeError::Api {
                status: status.as_u16(),
                message: format!("stat of {path} failed"),
            });
        }

        let header = response
            .headers()
            .get(PATH_STAT_HEADER)
            .ok_or_else(|| RuntimeError::Protocol(format!("missing {PATH_STAT_HEADER}")))?;
        decode_path_stat(header.as_bytes())
    }

    async fn logs(&self, id: &str, options: &LogOptions) -> Result<ByteStream, RuntimeError> {
        let mut builder = LogsOptionsBuilder::new()
            .stdout(options.stdout)
            .stderr(options.stderr)
            .follow(options.follow)
            .timestamps(options.timestamps);
        if let Some(tail) = &options.tail {
            builder = builder.tail(tail);
        }
        if let Some(since) = options.since {
            builder = builder.since(log_timestamp("since", since)?);
        }
        if let Some(until) = options.until {
            builder = builder.until(log_timestamp("until", until)?);
        }

        let stream = self
            .docker
            .logs(id, Some(builder.build()))
            .map(|chunk| chunk.map(frame_log_output).map_err(map_err));
        Ok(stream.boxed())
    }
}

fn log_timestamp(field: &str, seconds: i64) -> Result<i32, RuntimeError> {
    i32::try_from(seconds)
        .map_err(|_| RuntimeError::Protocol(format!("log {field} {seconds} out of range")))
}

/// Restore the 8-byte stream header that bollard strips from non-TTY log
/// chunks: stream id, three zero bytes, big-endian payload length. TTY
/// output has no header and passes through.
fn frame_log_output(output: LogOutput) -> Bytes {
    let (stream, message) = match output {
        LogOutput::StdIn { message } => (0u8, message),
        LogOutput::StdOut { message } => (1, message),
        LogOutput::StdErr { message } => (2, message),
        LogOutput::Console { message } => return message,
    };
    let mut framed = BytesMut::with_capacity(8 + message.len());
    framed.put_u8(stream);
    framed.put_bytes(0, 3);
    framed.put_u32(u32::try_from(message.len()).unwrap_or(u32::MAX));
    framed.extend_from_slice(&message);
    framed.freeze()
}

fn decode_path_stat(header: &[u8]) -> Result<PathStat, RuntimeError> {
    let json = STANDARD
        .decode(header)
        .map_err(|e| RuntimeError::Protocol(format!("path stat header: {e}")))?;
    serde_json::from_slice(&json)
        .map_err(|e| RuntimeError::Protocol(format!("path stat header: {e}")))
}
