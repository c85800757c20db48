//! API v1 routes.

mod containers;
mod exec;
mod logs;
mod users;

use axum::Router;

use crate::state::AppState;

/// Header carrying the path stat of an archive download, lower-cased.
pub const PATH_STAT_HEADER: &str = "x-berth-path-stat";

/// Buffer between a WebSocket and the session task it feeds.
const SOCKET_CHANNEL_CAPACITY: usize = 64;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(containers::routes())
        .merge(exec::routes())
        .merge(logs::routes())
        .merge(users::routes())
}
