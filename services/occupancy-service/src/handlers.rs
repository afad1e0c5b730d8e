use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{sse::Event, sse::KeepAlive, sse::Sse, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use std::{convert::Infallible, time::Duration};

use crate::ingest;
use crate::models::{ErrorResponse, SpotsQuery};
use crate::query::{self, QueryOutcome};
use crate::spots::SpotId;
use crate::state::AppState;

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn readyz() -> StatusCode {
    StatusCode::OK
}

pub async fn submit_report(State(state): State<AppState>, body: Bytes) -> Response {
    match ingest::ingest(&state, &body, Utc::now()) {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn list_spots(
    State(state): State<AppState>,
    Query(params): Query<SpotsQuery>,
) -> Response {
    match query::query(&state, params.if_version_greater_than, Utc::now()) {
        QueryOutcome::Snapshot(snapshot) => (StatusCode::OK, Json(snapshot)).into_response(),
        QueryOutcome::Unchanged(unchanged) => (StatusCode::OK, Json(unchanged)).into_response(),
    }
}

pub async fn get_spot(State(state): State<AppState>, Path(spot_id): Path<SpotId>) -> Response {
    let snapshot = state.store.read_snapshot();
    match snapshot.get(spot_id) {
        Some(spot) => (StatusCode::OK, Json(spot.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                status: "error",
                code: "unknown_spot",
                message: format!("spot {spot_id} is not configured"),
            }),
        )
            .into_response(),
    }
}

pub async fn stream_spots(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let mut versions = state.store.subscribe();
    let interval = state.config.stream_interval;

    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                changed = versions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                },
            }

            let snapshot = state.store.read_snapshot();
            let body = query::snapshot_response(&snapshot, Utc::now());
            match Event::default()
                .id(snapshot.version().to_string())
                .json_data(body)
            {
                Ok(event) => {
                    yield Ok(event);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "snapshot event encoding failed");
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(query::devices(&state, Utc::now()))
}

pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}
