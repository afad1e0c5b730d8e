use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::{sync::watch, time::MissedTickBehavior};

use crate::stats::IngestStats;
use crate::store::{is_offline, OfflineMarked, StateStore};

/// One staleness pass: finds silent devices and flips their spots to unknown.
pub fn scan(
    store: &StateStore,
    stats: &IngestStats,
    now: DateTime<Utc>,
    offline_threshold: TimeDelta,
) -> Option<OfflineMarked> {
    let candidates: HashSet<String> = store
        .read_device_health()
        .into_iter()
        .filter(|(_, record)| is_offline(record, now, offline_threshold))
        .map(|(device_id, _)| device_id)
        .collect();

    let marked = store.mark_offline(&candidates, now, offline_threshold);
    if let Some(marked) = &marked {
        stats.record_marked_unknown(marked.spots.len());
        tracing::warn!(
            devices = ?candidates,
            spots = ?marked.spots,
            version = marked.version,
            "devices offline, spots marked unknown"
        );
    }
    marked
}

/// Runs `scan` every `interval` until `shutdown` flips to true.
pub async fn run(
    store: Arc<StateStore>,
    stats: Arc<IngestStats>,
    interval: Duration,
    offline_threshold: TimeDelta,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(interval_secs = interval.as_secs(), "staleness monitor started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                scan(&store, &stats, Utc::now(), offline_threshold);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("staleness monitor stopped");
}
