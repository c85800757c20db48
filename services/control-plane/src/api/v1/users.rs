//! Per-user settings and API keys.

use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/users/config/default-shell",
            get(get_default_shell).put(set_default_shell),
        )
        .route("/users/api-key", get(get_api_key).post(reissue_api_key))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DefaultShellBody {
    pub default_shell: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// GET /v1/users/config/default-shell
async fn get_default_shell(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<DefaultShellBody>, ApiError> {
    let default_shell = state
        .orchestrator()
        .user_default_shell(&ctx.owner_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(DefaultShellBody { default_shell }))
}

/// PUT /v1/users/config/default-shell
async fn set_default_shell(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(body): Json<DefaultShellBody>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator()
        .set_user_default_shell(&ctx.owner_id, body.default_shell.as_deref().unwrap_or(""))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/users/api-key
async fn get_api_key(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let api_key = state
        .api_keys()
        .get_or_create(&ctx.owner_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    Ok(Json(ApiKeyResponse { api_key }))
}

/// POST /v1/users/api-key
async fn reissue_api_key(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let api_key = state
        .api_keys()
        .reissue(&ctx.owner_id)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;
    info!(owner_id = %ctx.owner_id, "API key reissued");
    Ok(Json(ApiKeyResponse { api_key }))
}
