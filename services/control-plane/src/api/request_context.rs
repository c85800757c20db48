//! Request-scoped context: request id and the calling owner.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "X-API-Key";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_OWNER_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub owner_id: String,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Owner named by a dev bearer token (`Bearer user:<owner>`).
fn dev_owner(headers: &HeaderMap) -> Option<String> {
    let value = header_string(headers, AUTHORIZATION_HEADER)?;
    let owner = value.strip_prefix("Bearer ")?.trim().strip_prefix("user:")?.trim();
    (!owner.is_empty() && owner.len() <= MAX_OWNER_ID_LEN).then(|| owner.to_string())
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(key) = header_string(&parts.headers, API_KEY_HEADER) {
            return match state.api_keys().resolve(&key).await {
                Ok(Some(owner_id)) => Ok(Self {
                    request_id,
                    owner_id,
                }),
                Ok(None) => Err(ApiError::unauthorized("invalid_api_key", "unknown API key")
                    .with_request_id(request_id)),
                Err(e) => Err(ApiError::from(e).with_request_id(request_id)),
            };
        }

        if state.dev_mode() {
            if let Some(owner_id) = dev_owner(&parts.headers) {
                return Ok(Self {
                    request_id,
                    owner_id,
                });
            }
        }

        Err(ApiError::unauthorized(
            "unauthenticated",
            "an X-API-Key header is required",
        )
        .with_request_id(request_id))
    }
}
