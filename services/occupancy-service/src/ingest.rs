use chrono::{DateTime, Utc};

use crate::models::{AckResponse, SensorReport};
use crate::state::AppState;
use crate::validator::{validate, RejectReason};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed report: {0}")]
    MalformedInput(String),
    #[error("report rejected: {0}")]
    Rejected(RejectReason),
}

/// Parses, validates and applies one raw device report.
///
/// Rejected and malformed reports never touch the store.
pub fn ingest(state: &AppState, body: &[u8], now: DateTime<Utc>) -> Result<AckResponse, IngestError> {
    let report: SensorReport = serde_json::from_slice(body).map_err(|err| {
        state.stats.record_malformed();
        tracing::info!(error = %err, "malformed report");
        IngestError::MalformedInput(err.to_string())
    })?;

    let device_id = report.device_id.clone();
    let normalized = validate(report, &state.config.validation, now)
        .map_err(|reason| reject(state, &device_id, reason))?;

    if !normalized.ignored.is_empty() {
        state.stats.record_partial_unknown();
        tracing::warn!(
            device_id = normalized.device_id.as_str(),
            ignored_spots = ?normalized.ignored,
            "report references unconfigured spots"
        );
    }

    let version = state
        .store
        .apply_report(&normalized, now)
        .map_err(|err| reject(state, &device_id, err.into()))?;

    state.stats.record_accepted();
    tracing::info!(
        device_id = normalized.device_id.as_str(),
        version,
        spots = normalized.readings.len(),
        "report accepted"
    );

    Ok(AckResponse {
        status: "accepted",
        version,
        ignored_spots: normalized.ignored,
    })
}

fn reject(state: &AppState, device_id: &str, reason: RejectReason) -> IngestError {
    state.stats.record_rejected(&reason);
    tracing::warn!(device_id, reason = reason.code(), detail = %reason, "report rejected");
    IngestError::Rejected(reason)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::config::test_config;
    use crate::spots::Occupancy;

    fn body(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).expect("encode")
    }

    #[test]
    fn accepted_report_is_visible_in_snapshot() {
        let state = AppState::new(test_config(&[1, 2, 3]));
        let now = Utc::now();
        let ack = ingest(
            &state,
            &body(json!({
                "deviceId": "d1",
                "spots": [{"id": 1, "value": true}, {"id": 2, "value": false}],
                "sentAt": now.to_rfc3339(),
            })),
            now,
        )
        .expect("accepted");

        assert_eq!(ack.status, "accepted");
        let snapshot = state.store.read_snapshot();
        assert!(snapshot.version() >= ack.version);
        assert_eq!(snapshot.get(1).expect("spot 1").state, Occupancy::Occupied);
        assert_eq!(snapshot.get(2).expect("spot 2").state, Occupancy::Free);
        assert_eq!(snapshot.get(3).expect("spot 3").state, Occupancy::Unknown);
        assert_eq!(state.stats.snapshot().accepted, 1);
    }

    #[test]
    fn malformed_input_leaves_state_alone() {
        let state = AppState::new(test_config(&[1]));
        let result = ingest(&state, br#"{"deviceId": 5}"#, Utc::now());

        assert!(matches!(result, Err(IngestError::MalformedInput(_))));
        assert_eq!(state.store.read_snapshot().version(), 0);
        assert_eq!(state.stats.snapshot().malformed, 1);
    }

    #[test]
    fn stale_report_is_rejected_and_counted() {
        let state = AppState::new(test_config(&[1]));
        let now = Utc::now();
        let sent_at = now - TimeDelta::hours(1);
        let result = ingest(
            &state,
            &body(json!({
                "deviceId": "d1",
                "spots": [{"id": 1, "value": true}],
                "sentAt": sent_at.timestamp(),
            })),
            now,
        );

        assert!(matches!(
            result,
            Err(IngestError::Rejected(RejectReason::StaleOrFutureReport { .. }))
        ));
        assert_eq!(state.store.read_snapshot().version(), 0);
        assert_eq!(state.stats.snapshot().rejected_stale_or_future, 1);
    }

    #[test]
    fn partially_unknown_report_applies_known_spots() {
        let state = AppState::new(test_config(&[1, 2]));
        let now = Utc::now();
        let ack = ingest(
            &state,
            &body(json!({
                "deviceId": "d1",
                "spots": [{"id": 2, "value": 1}, {"id": 99, "value": 0}],
                "sentAt": now.timestamp_millis(),
            })),
            now,
        )
        .expect("accepted");

        assert_eq!(ack.ignored_spots, vec![99]);
        let snapshot = state.store.read_snapshot();
        assert_eq!(snapshot.get(2).expect("spot 2").state, Occupancy::Occupied);
        assert_eq!(state.stats.snapshot().partial_unknown_spots, 1);
    }

    #[test]
    fn negative_spot_id_is_ignored_not_malformed() {
        let state = AppState::new(test_config(&[1, 2]));
        let now = Utc::now();
        let ack = ingest(
            &state,
            &body(json!({
                "deviceId": "d1",
                "spots": [{"id": 1, "value": true}, {"id": -1, "value": true}],
                "sentAt": now.to_rfc3339(),
            })),
            now,
        )
        .expect("accepted");

        assert_eq!(ack.ignored_spots, vec![-1]);
        let snapshot = state.store.read_snapshot();
        assert_eq!(snapshot.get(1).expect("spot 1").state, Occupancy::Occupied);
        assert_eq!(state.stats.snapshot().malformed, 0);
        assert_eq!(state.stats.snapshot().partial_unknown_spots, 1);
    }

    #[test]
    fn out_of_sequence_report_is_rejected() {
        let state = AppState::new(test_config(&[1]));
        let now = Utc::now();
        let report = |sent_at: DateTime<Utc>, value: bool| {
            body(json!({
                "deviceId": "d1",
                "spots": [{"id": 1, "value": value}],
                "sentAt": sent_at.to_rfc3339(),
            }))
        };

        ingest(&state, &report(now, true), now).expect("first");
        let result = ingest(&state, &report(now - TimeDelta::seconds(10), false), now);

        assert!(matches!(
            result,
            Err(IngestError::Rejected(RejectReason::OutOfSequence { .. }))
        ));
        let snapshot = state.store.read_snapshot();
        assert_eq!(snapshot.get(1).expect("spot").state, Occupancy::Occupied);
        assert_eq!(state.stats.snapshot().rejected_out_of_sequence, 1);
    }
}
