use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::handlers::{
    get_spot, healthz, list_devices, list_spots, readyz, stats, stream_spots, submit_report,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let timeout = state.config.request_timeout;
    let max_body_bytes = state.config.max_body_bytes;

    // The event stream is long-lived, so only request/response routes get the timeout.
    let bounded = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/reports", post(submit_report))
        .route("/v1/spots", get(list_spots))
        .route("/v1/spots/:id", get(get_spot))
        .route("/v1/devices", get(list_devices))
        .route("/v1/stats", get(stats))
        .layer(TimeoutLayer::new(timeout));

    Router::new()
        .merge(bounded)
        .route("/v1/spots/stream", get(stream_spots))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
