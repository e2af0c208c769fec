//! Mesh relay binary.
//!
//! Startup:
//! 1. Load configuration and initialise tracing
//! 2. Install the Prometheus recorder
//! 3. Bind the health server (`/health`, `/ready`, `/metrics`)
//! 4. Bind the WebSocket listener and mark ready
//! 5. Wait for Ctrl+C or SIGTERM, then drain

use axum::Router;
use common::observability::init_tracing;
use mesh_relay::config::Config;
use mesh_relay::errors::RelayError;
use mesh_relay::observability::metrics::init_metrics_recorder;
use mesh_relay::observability::{health_router, HealthState};
use mesh_relay::{relay_router, RelayHub, RelayState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_tracing(&config.observability)?;

    info!(
        target: "mesh.relay",
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_frame_bytes = config.max_frame_bytes,
        "Starting mesh relay"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(target: "mesh.relay", error = %e, "Failed to install metrics recorder");
        RelayError::Metrics(e)
    })?;

    let health_state = Arc::new(HealthState::new());
    let shutdown = CancellationToken::new();

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);
    let health_listener = bind(&config.health_bind_address).await?;
    let health_shutdown = shutdown.child_token();
    let health_task = tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app)
            .with_graceful_shutdown(async move { health_shutdown.cancelled().await });
        if let Err(e) = server.await {
            error!(target: "mesh.relay", error = %e, "Health server failed");
        }
    });

    let state = RelayState::new(RelayHub::new(), config.max_frame_bytes, shutdown.child_token());
    let relay_listener = bind(&config.bind_address).await?;
    let relay_shutdown = shutdown.child_token();
    let relay_task = tokio::spawn(async move {
        let server = axum::serve(relay_listener, relay_router(state))
            .with_graceful_shutdown(async move { relay_shutdown.cancelled().await });
        if let Err(e) = server.await {
            error!(target: "mesh.relay", error = %e, "Relay server failed");
        }
    });

    health_state.set_ready();
    info!(target: "mesh.relay", "Mesh relay ready");

    shutdown_signal().await;
    info!(target: "mesh.relay", "Shutdown signal received");
    health_state.set_not_ready();
    shutdown.cancel();

    if let Err(e) = relay_task.await {
        error!(target: "mesh.relay", error = %e, "Relay task join failed");
    }
    if let Err(e) = health_task.await {
        error!(target: "mesh.relay", error = %e, "Health task join failed");
    }

    info!(target: "mesh.relay", "Mesh relay stopped");
    Ok(())
}

async fn bind(address: &str) -> Result<TcpListener, RelayError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|e| RelayError::Bind {
            address: address.to_string(),
            message: e.to_string(),
        })?;
    info!(target: "mesh.relay", address = %address, "Listener bound");
    Ok(listener)
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(target: "mesh.relay", error = %e, "Ctrl+C handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(target: "mesh.relay", error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
