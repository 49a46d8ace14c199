//! # licd-api — Binary Entry Point
//!
//! Starts the license coordination HTTP server and the lease reclaimer.
//! Binds to configurable port (default 8000).

use licd_api::config::AppConfig;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env();
    init_tracing(config.as_ref().map(|c| c.log_json).unwrap_or(false));
    let config = config.map_err(|e| {
        tracing::error!("Configuration invalid: {e}");
        e
    })?;
    tracing::info!(config = ?config, "licd starting");

    let metrics = if config.metrics_enabled {
        Some(licd_api::telemetry::install_recorder().map_err(|e| {
            tracing::error!("Metrics recorder installation failed: {e}");
            e
        })?)
    } else {
        None
    };

    // Initialize database pool. Absent means in-memory only.
    let db_pool = licd_api::db::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;

    let port = config.port;
    let sweep_interval = config.sweep_interval;

    let mut state = licd_api::bootstrap::bootstrap(config, db_pool).map_err(|e| {
        tracing::error!("Bootstrap failed: {e}");
        e
    })?;
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }

    // Hydrate in-memory pools and leases from the journal (if connected).
    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaimer = licd_api::reclaim::spawn(state.clone(), sweep_interval, shutdown_rx);

    let app = licd_api::app(state.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("licd listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = reclaimer.await {
        tracing::warn!("Reclaimer task ended abnormally: {e}");
    }
    let flushed = state.flush_journal().await;
    if flushed.pending > 0 {
        tracing::warn!(pending = flushed.pending, "journal writes lost at shutdown");
    }
    tracing::info!("licd stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
