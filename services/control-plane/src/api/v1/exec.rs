//! Interactive exec over WebSocket.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, RawQuery, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::SOCKET_CHANNEL_CAPACITY;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::exec::ExecSession;
use crate::logs::parse_flag;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/containers/{id}/exec", get(exec_container))
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ExecParams {
    command: Vec<String>,
    tty: bool,
}

fn decode_component(raw: &str) -> Result<String, ApiError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|s| s.into_owned())
        .map_err(|_| ApiError::bad_request("invalid_request", "query is not valid UTF-8"))
}

/// Parse `command` (repeatable, in order) and `tty` from a raw query string.
fn parse_exec_query(query: Option<&str>) -> Result<ExecParams, ApiError> {
    let mut params = ExecParams::default();
    for pair in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match decode_component(key)?.as_str() {
            "command" => params.command.push(decode_component(value)?),
            "tty" => {
                let value = decode_component(value)?;
                params.tty = parse_flag(&value).ok_or_else(|| {
                    ApiError::bad_request(
                        "invalid_request",
                        format!("tty must be a boolean, got {value:?}"),
                    )
                })?;
            }
            _ => {}
        }
    }
    Ok(params)
}

/// GET /v1/containers/{id}/exec?command=..&tty=bool
async fn exec_container(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let request_id = ctx.request_id;
    let params = parse_exec_query(query.as_deref())
        .map_err(|e| e.with_request_id(request_id.clone()))?;

    let (runtime_id, spec) = state
        .orchestrator()
        .prepare_exec(&ctx.owner_id, &id, params.command, params.tty)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(request_id.clone()))?;

    let session = ExecSession::new(state.orchestrator().runtime().clone(), runtime_id, spec);
    Ok(ws.on_upgrade(move |socket| handle_exec_socket(socket, session, request_id)))
}

async fn handle_exec_socket(socket: WebSocket, session: ExecSession, request_id: String) {
    let (mut client_sender, mut client_receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(SOCKET_CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(SOCKET_CHANNEL_CAPACITY);

    let to_client = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if client_sender.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        let _ = client_sender.send(Message::Close(None)).await;
    });

    let from_client = tokio::spawn(async move {
        while let Some(msg) = client_receiver.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_) | Message::Pong(_)) => continue,
                Err(e) => {
                    debug!(error = %e, "Exec socket read failed");
                    break;
                }
            };
            if inbound_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    session.run(inbound_rx, outbound_tx).await;
    from_client.abort();
    let _ = to_client.await;
    debug!(request_id = %request_id, "Exec socket closed");
}
