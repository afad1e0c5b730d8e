use chrono::{DateTime, Utc};

use crate::models::{DeviceSummary, DevicesResponse, SnapshotResponse, UnchangedResponse};
use crate::spots::SpotState;
use crate::state::AppState;
use crate::store::is_offline;

pub enum QueryOutcome {
    Snapshot(SnapshotResponse),
    Unchanged(UnchangedResponse),
}

/// Latest snapshot, or a no-change marker when the caller already holds it.
pub fn query(
    state: &AppState,
    if_version_greater_than: Option<u64>,
    now: DateTime<Utc>,
) -> QueryOutcome {
    let snapshot = state.store.read_snapshot();

    match if_version_greater_than {
        Some(known) if snapshot.version() <= known => QueryOutcome::Unchanged(UnchangedResponse {
            status: "unchanged",
            version: snapshot.version(),
            generated_at: now,
        }),
        _ => QueryOutcome::Snapshot(snapshot_response(&snapshot, now)),
    }
}

pub fn snapshot_response(snapshot: &SpotState, now: DateTime<Utc>) -> SnapshotResponse {
    SnapshotResponse {
        spots: snapshot.spots().cloned().collect(),
        version: snapshot.version(),
        generated_at: now,
    }
}

pub fn devices(state: &AppState, now: DateTime<Utc>) -> DevicesResponse {
    let health = state.store.read_device_health();
    let mut devices: Vec<DeviceSummary> = health
        .into_iter()
        .map(|(device_id, record)| DeviceSummary {
            online: !is_offline(&record, now, state.config.offline_threshold),
            device_id,
            last_seen: record.last_seen,
            last_sent_at: record.last_sent_at,
        })
        .collect();
    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

    DevicesResponse {
        devices,
        generated_at: now,
    }
}
