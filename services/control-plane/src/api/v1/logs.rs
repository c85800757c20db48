//! Container log streaming over WebSocket.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::SOCKET_CHANNEL_CAPACITY;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::logs::{LogQuery, LogStream};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/containers/{id}/logs", get(stream_logs))
}

/// GET /v1/containers/{id}/logs
///
/// Each runtime chunk becomes one binary message.
async fn stream_logs(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    query: Result<Query<LogQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id;
    let Query(query) = query.map_err(|e| {
        ApiError::bad_request("invalid_request", e.body_text()).with_request_id(request_id.clone())
    })?;
    let options = query
        .into_options()
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let source = state
        .orchestrator()
        .open_logs(&ctx.owner_id, &id, &options)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let stream = LogStream::new(source);
    Ok(ws.on_upgrade(move |socket| handle_log_socket(socket, stream, request_id)))
}

async fn handle_log_socket(socket: WebSocket, stream: LogStream, request_id: String) {
    let (mut client_sender, mut client_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Bytes>(SOCKET_CHANNEL_CAPACITY);

    let forward = tokio::spawn(stream.forward(tx));

    let mut to_client = tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if client_sender.send(Message::Binary(chunk)).await.is_err() {
                return;
            }
        }
        let _ = client_sender.send(Message::Close(None)).await;
    });

    // Only watches for the client going away.
    let mut from_client = tokio::spawn(async move {
        while let Some(Ok(msg)) = client_receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut to_client => from_client.abort(),
        _ = &mut from_client => to_client.abort(),
    }
    forward.abort();
    debug!(request_id = %request_id, "Log socket closed");
}
