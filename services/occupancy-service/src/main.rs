mod app;
mod config;
mod error;
mod handlers;
mod ingest;
mod models;
mod query;
mod spots;
mod staleness;
mod state;
mod stats;
mod store;
mod validator;

use std::{process, sync::Arc};

use parkwatch_common::{bind_listener, init_tracing, shutdown_signal};
use tokio::sync::watch;

use crate::config::OccupancyConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let _guards = init_tracing("occupancy-service");

    let config = match OccupancyConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            process::exit(2);
        }
    };
    tracing::info!(
        spots = ?config.validation.spot_ids,
        polarity = %config.validation.polarity,
        strict_sequencing = config.strict_sequencing,
        offline_threshold_secs = config.offline_threshold.num_seconds(),
        "configuration loaded"
    );

    let port = config.port;
    let state = AppState::new(config);

    // Spots start unknown; the monitor keeps them honest once devices go quiet.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = tokio::spawn(staleness::run(
        Arc::clone(&state.store),
        Arc::clone(&state.stats),
        state.config.scan_interval,
        state.config.offline_threshold,
        shutdown_rx,
    ));

    let app = app::build_router(state);
    let listener = match bind_listener(port).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port, "bind listener failed");
            process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
    }

    let _ = shutdown_tx.send(true);
    if let Err(err) = monitor.await {
        tracing::error!(error = %err, "staleness monitor panicked");
    }
}
