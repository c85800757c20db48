//! Orchestrator error taxonomy.

use berth_routing::RoutingError;
use thiserror::Error;

use crate::db::DbError;
use crate::reconciler::ReconcileError;
use crate::runtime::RuntimeError;

/// Errors surfaced by synchronous orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("name {0:?} is already in use")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("container {0} is running")]
    RunningContainer(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub(crate) fn container_not_found(id_or_name: &str) -> Self {
        OrchestratorError::NotFound(format!("container {id_or_name} not found"))
    }
}

impl From<DbError> for OrchestratorError {
    fn from(err: DbError) -> Self {
        OrchestratorError::Internal(format!("database: {err}"))
    }
}

impl From<RoutingError> for OrchestratorError {
    fn from(err: RoutingError) -> Self {
        OrchestratorError::Internal(format!("routing store: {err}"))
    }
}

impl From<RuntimeError> for OrchestratorError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(message) => OrchestratorError::NotFound(message),
            other => OrchestratorError::Internal(format!("runtime: {other}")),
        }
    }
}

impl From<ReconcileError> for OrchestratorError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Runtime(e) => e.into(),
            other => OrchestratorError::Internal(other.to_string()),
        }
    }
}
