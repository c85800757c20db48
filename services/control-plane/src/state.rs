//! Application state shared across request handlers.

use std::sync::Arc;

use crate::db::{ApiKeyStore, Database};
use crate::orchestrator::ContainerOrchestrator;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    orchestrator: ContainerOrchestrator,
    api_keys: Arc<dyn ApiKeyStore>,
    /// `None` when running on the in-memory stores.
    db: Option<Database>,
    dev_mode: bool,
}

impl AppState {
    pub fn new(
        orchestrator: ContainerOrchestrator,
        api_keys: Arc<dyn ApiKeyStore>,
        db: Option<Database>,
        dev_mode: bool,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                orchestrator,
                api_keys,
                db,
                dev_mode,
            }),
        }
    }

    pub fn orchestrator(&self) -> &ContainerOrchestrator {
        &self.inner.orchestrator
    }

    pub fn api_keys(&self) -> &Arc<dyn ApiKeyStore> {
        &self.inner.api_keys
    }

    pub fn db(&self) -> Option<&Database> {
        self.inner.db.as_ref()
    }

    /// Whether dev bearer identities are accepted.
    pub fn dev_mode(&self) -> bool {
        self.inner.dev_mode
    }
}
