//! berth control plane
//!
//! Serves the container API, drives the runtime and keeps the reverse
//! proxy's routing table in step with container state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use berth_control_plane::{
    api, bootstrap, config,
    db::Database,
    orchestrator::{ContainerOrchestrator, OrchestratorConfig},
    reconciler::StatusReconciler,
    runtime::DockerRuntime,
    state::AppState,
};
use berth_routing::{ConsulKv, RoutingRegistrar};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to BERTH_LOG_LEVEL.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen_addr = %config.listen_addr,
        public_addr = %config.public_addr,
        https = config.https,
        "Starting berth control plane"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let runtime = Arc::new(DockerRuntime::connect(
        &config.docker_socket,
        &config.docker_api_version,
        config.docker_timeout_secs,
    )?);
    let routing = RoutingRegistrar::new(
        Arc::new(ConsulKv::new(config.consul_addr.clone())?),
        config.routing_prefix.clone(),
    );

    let orchestrator = ContainerOrchestrator::new(
        Arc::new(db.container_store()),
        runtime,
        routing.clone(),
        OrchestratorConfig {
            public_addr: config.public_addr.clone(),
            https: config.https,
            network: config.network.clone(),
            default_shell: config.default_shell.clone(),
        },
    );

    bootstrap::register_platform(
        &routing,
        &config.public_addr,
        config.https,
        &config.self_addr,
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let status_reconciler = StatusReconciler::new(orchestrator.reconciler().clone());
    let reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            status_reconciler.run(shutdown_rx).await;
        }
    });

    let state = AppState::new(
        orchestrator,
        Arc::new(db.api_key_store()),
        Some(db),
        config.dev_mode,
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    if let Err(e) = bootstrap::deregister_platform(&routing).await {
        warn!(error = %e, "Failed to withdraw platform backend");
    }

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, reconciler_handle)
        .await
        .is_err()
    {
        warn!("Status reconciler did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
