//! Stream balancer service
//!
//! Serves the allocation engine over HTTP. Allocation state is held in
//! process, one versioned record per guard/environment namespace.

use anyhow::Result;
use streambal_engine::StreamBalancer;
use streambal_server::{api, config, state::AppState};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to STREAMBAL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting stream balancer");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let guards = config.guard_configs()?;
    let overrides = guards.override_count();
    let balancer = match StreamBalancer::new(guards) {
        Ok(balancer) => balancer,
        Err(e) => {
            error!(error = %e, "Invalid guard configuration");
            return Err(e.into());
        }
    };
    info!(
        overall_capacity = config.default_guard.overall_capacity,
        per_group_capacity = config.default_guard.per_group_capacity,
        grouping_tag_key = %config.default_guard.grouping_tag_key,
        overrides,
        "Allocation engine ready"
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create application state
    let state = AppState::new(balancer);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            true
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            false
        }
    };

    if interrupted {
        // Signal shutdown and let in-flight requests drain
        let _ = shutdown_tx.send(true);
        let shutdown_timeout = std::time::Duration::from_secs(10);
        if let Err(e) = tokio::time::timeout(shutdown_timeout, server_handle).await {
            warn!(error = %e, "Server did not shut down in time");
        }
    }

    info!("Stream balancer shutdown complete");
    Ok(())
}
