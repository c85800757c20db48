//! Container API endpoints.

use axum::{
    body::Body,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::PATH_STAT_HEADER;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::orchestrator::{validate_name, ContainerConfig, CreateRequest, InspectView, ListEntry};
use crate::runtime::{ByteStream, CopyOptions, PathStat, RuntimeError};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/containers", post(create_container).get(list_containers))
        .route(
            "/containers/{id}",
            get(inspect_container).delete(remove_container),
        )
        .route("/containers/{id}/start", post(start_container))
        .route("/containers/{id}/stop", post(stop_container))
        .route(
            "/containers/{id}/archive",
            put(upload_archive)
                .get(download_archive)
                .head(stat_archive),
        )
        .route(
            "/containers/{id}/config",
            get(get_container_config).put(set_container_config),
        )
}

// =============================================================================
// Request/Response Types
// =============================================================================

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateContainerBody {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_true")]
    pub ssl_redirect: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateContainerResponse {
    pub id: i64,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ArchiveParams {
    pub path: Option<String>,
    #[serde(default)]
    pub allow_overwrite: bool,
    #[serde(default)]
    pub copy_uid_gid: bool,
}

impl ArchiveParams {
    fn path(&self, request_id: &str) -> Result<&str, ApiError> {
        self.path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ApiError::bad_request("invalid_request", "query parameter 'path' is required")
                    .with_request_id(request_id.to_string())
            })
    }
}

fn query_or_400<T>(
    query: Result<Query<T>, QueryRejection>,
    request_id: &str,
) -> Result<T, ApiError> {
    query.map(|Query(q)| q).map_err(|e| {
        ApiError::bad_request("invalid_request", e.body_text())
            .with_request_id(request_id.to_string())
    })
}

/// Header value for a path stat: base64 of its JSON form.
fn path_stat_header(stat: &PathStat) -> Result<HeaderValue, ApiError> {
    let json = serde_json::to_vec(stat)
        .map_err(|e| ApiError::internal("internal_error", e.to_string()))?;
    HeaderValue::from_str(&STANDARD.encode(json))
        .map_err(|e| ApiError::internal("internal_error", e.to_string()))
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/containers
async fn create_container(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<CreateContainerBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;
    validate_name(&body.name).map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let request = CreateRequest {
        name: body.name,
        image: body.image,
        cmd: body.cmd,
        entrypoint: body.entrypoint,
        env: body.env,
        volumes: body.volumes,
        working_dir: body.working_dir.filter(|d| !d.is_empty()),
        ssl_redirect: body.ssl_redirect,
    };
    let created = state
        .orchestrator()
        .create(&ctx.owner_id, request)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateContainerResponse {
            id: created.id,
            endpoints: created.endpoints,
        }),
    ))
}

/// GET /v1/containers
async fn list_containers(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<ListEntry>>, ApiError> {
    let entries = state
        .orchestrator()
        .list(&ctx.owner_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(entries))
}

/// GET /v1/containers/{id}
async fn inspect_container(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<InspectView>, ApiError> {
    let view = state
        .orchestrator()
        .inspect(&ctx.owner_id, &id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(view))
}

/// DELETE /v1/containers/{id}?force=bool
async fn remove_container(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    params: Result<Query<RemoveParams>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let params = query_or_400(params, &ctx.request_id)?;
    state
        .orchestrator()
        .remove(&ctx.owner_id, &id, params.force)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/containers/{id}/start
async fn start_container(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator()
        .start(&ctx.owner_id, &id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/containers/{id}/stop
async fn stop_container(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator()
        .stop(&ctx.owner_id, &id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

fn archive_stream(body: Body) -> ByteStream {
    body.into_data_stream()
        .map(|chunk| chunk.map_err(|e| RuntimeError::Transport(format!("request body: {e}"))))
        .boxed()
}

/// PUT /v1/containers/{id}/archive?path=..
///
/// The body is a tar archive extracted at `path`. It is streamed to the
/// runtime as it arrives.
async fn upload_archive(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    params: Result<Query<ArchiveParams>, QueryRejection>,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let params = query_or_400(params, &ctx.request_id)?;
    let path = params.path(&ctx.request_id)?;
    let options = CopyOptions {
        allow_overwrite: params.allow_overwrite,
        copy_uid_gid: params.copy_uid_gid,
    };

    state
        .orchestrator()
        .upload(&ctx.owner_id, &id, path, archive_stream(body), options)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/containers/{id}/archive?path=..
async fn download_archive(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    params: Result<Query<ArchiveParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let params = query_or_400(params, &ctx.request_id)?;
    let path = params.path(&ctx.request_id)?;

    let download = state
        .orchestrator()
        .download(&ctx.owner_id, &id, path)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;
    let stat = path_stat_header(&download.stat)?;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/x-tar")),
            (header::HeaderName::from_static(PATH_STAT_HEADER), stat),
        ],
        Body::from_stream(download.archive),
    )
        .into_response())
}

/// HEAD /v1/containers/{id}/archive?path=..
async fn stat_archive(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    params: Result<Query<ArchiveParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let params = query_or_400(params, &ctx.request_id)?;
    let path = params.path(&ctx.request_id)?;

    let stat = state
        .orchestrator()
        .stat(&ctx.owner_id, &id, path)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id.clone()))?;

    Ok((
        [(header::HeaderName::from_static(PATH_STAT_HEADER), path_stat_header(&stat)?)],
        StatusCode::OK,
    )
        .into_response())
}

/// GET /v1/containers/{id}/config
async fn get_container_config(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> Result<Json<ContainerConfig>, ApiError> {
    let config = state
        .orchestrator()
        .get_config(&ctx.owner_id, &id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(config))
}

/// PUT /v1/containers/{id}/config
async fn set_container_config(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(config): Json<ContainerConfig>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator()
        .set_config(&ctx.owner_id, &id, &config)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(StatusCode::NO_CONTENT)
}
