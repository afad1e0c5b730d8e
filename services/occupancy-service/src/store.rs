use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::spots::{DeviceHealth, DeviceRecord, Occupancy, SpotId, SpotState};
use crate::validator::NormalizedReport;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("report sent at {sent_at} predates last accepted report at {last_sent_at}")]
    OutOfSequence {
        sent_at: DateTime<Utc>,
        last_sent_at: DateTime<Utc>,
    },
}

/// Spots flipped to unknown by one staleness pass.
#[derive(Debug, PartialEq)]
pub struct OfflineMarked {
    pub version: u64,
    pub spots: Vec<SpotId>,
}

struct Published {
    state: Arc<SpotState>,
    health: Arc<DeviceHealth>,
}

/// Owner of the live snapshot and device health map.
///
/// Readers load the published pair without locking. Writers are serialized
/// by `writer`, build the next snapshot off to the side and publish it with
/// one atomic swap. Nothing here awaits, so a dropped request future cannot
/// interrupt a half-built update, and neither primitive poisons: a panicking
/// writer loses only its own update.
pub struct StateStore {
    published: ArcSwap<Published>,
    writer: Mutex<()>,
    strict_sequencing: bool,
    versions: watch::Sender<u64>,
}

impl StateStore {
    pub fn new(spot_ids: &BTreeSet<SpotId>, strict_sequencing: bool) -> Self {
        let (versions, _) = watch::channel(0);
        Self {
            published: ArcSwap::from_pointee(Published {
                state: Arc::new(SpotState::new(spot_ids)),
                health: Arc::new(DeviceHealth::new()),
            }),
            writer: Mutex::new(()),
            strict_sequencing,
            versions,
        }
    }

    pub fn read_snapshot(&self) -> Arc<SpotState> {
        Arc::clone(&self.published.load().state)
    }

    pub fn read_device_health(&self) -> DeviceHealth {
        self.published.load().health.as_ref().clone()
    }

    /// Receives the latest version after every published change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.versions.subscribe()
    }

    /// Applies every reading of `report` as one unit and bumps the version once.
    pub fn apply_report(
        &self,
        report: &NormalizedReport,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let _writer = self.writer.lock();
        let current = self.published.load_full();

        if self.strict_sequencing {
            if let Some(record) = current.health.get(&report.device_id) {
                if report.sent_at < record.last_sent_at {
                    return Err(StoreError::OutOfSequence {
                        sent_at: report.sent_at,
                        last_sent_at: record.last_sent_at,
                    });
                }
            }
        }

        let mut next = current.state.as_ref().clone();
        for (spot_id, occupied) in &report.readings {
            if let Some(spot) = next.spot_mut(*spot_id) {
                spot.state = Occupancy::from_occupied(*occupied);
                spot.last_updated = Some(now);
                spot.source_device_id = Some(report.device_id.clone());
            }
        }
        let version = next.bump_version();

        let mut next_health = current.health.as_ref().clone();
        next_health.insert(
            report.device_id.clone(),
            DeviceRecord {
                last_seen: now,
                last_sent_at: report.sent_at,
            },
        );

        self.publish(next, Arc::new(next_health));
        Ok(version)
    }

    /// Marks spots owned by `candidates` as unknown when those devices are
    /// still silent past `offline_threshold` at `now`.
    ///
    /// Candidates are rechecked under the writer lock, so a device that
    /// reported after the caller read the health map keeps its spots.
    pub fn mark_offline(
        &self,
        candidates: &HashSet<String>,
        now: DateTime<Utc>,
        offline_threshold: TimeDelta,
    ) -> Option<OfflineMarked> {
        if candidates.is_empty() {
            return None;
        }

        let _writer = self.writer.lock();
        let current = self.published.load_full();

        let offline: HashSet<&str> = candidates
            .iter()
            .filter(|device_id| {
                current
                    .health
                    .get(device_id.as_str())
                    .is_some_and(|record| is_offline(record, now, offline_threshold))
            })
            .map(String::as_str)
            .collect();
        if offline.is_empty() {
            return None;
        }

        let mut next = current.state.as_ref().clone();
        let mut spots = Vec::new();
        for spot in next.spots_mut() {
            let owned_by_offline = spot
                .source_device_id
                .as_deref()
                .is_some_and(|device_id| offline.contains(device_id));
            if owned_by_offline && spot.state != Occupancy::Unknown {
                spot.state = Occupancy::Unknown;
                spots.push(spot.id);
            }
        }
        if spots.is_empty() {
            return None;
        }

        let version = next.bump_version();
        self.publish(next, Arc::clone(&current.health));
        Some(OfflineMarked { version, spots })
    }

    fn publish(&self, state: SpotState, health: Arc<DeviceHealth>) {
        let version = state.version();
        self.published.store(Arc::new(Published {
            state: Arc::new(state),
            health,
        }));
        self.versions.send_replace(version);
    }
}

pub fn is_offline(record: &DeviceRecord, now: DateTime<Utc>, offline_threshold: TimeDelta) -> bool {
    now - record.last_seen > offline_threshold
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn store(ids: &[SpotId]) -> StateStore {
        StateStore::new(&ids.iter().copied().collect(), true)
    }

    fn normalized(device_id: &str, readings: &[(SpotId, bool)], sent_at: DateTime<Utc>) -> NormalizedReport {
        NormalizedReport {
            device_id: device_id.to_string(),
            readings: readings.to_vec(),
            sent_at,
            ignored: Vec::new(),
        }
    }

    #[test]
    fn applies_report_and_bumps_version_once() {
        let store = store(&[1, 2, 3]);
        let now = Utc::now();

        let version = store
            .apply_report(&normalized("d1", &[(1, true), (2, false)], now), now)
            .expect("apply");
        assert_eq!(version, 1);

        let snapshot = store.read_snapshot();
        assert_eq!(snapshot.version(), 1);
        let spot_one = snapshot.get(1).expect("spot 1");
        assert_eq!(spot_one.state, Occupancy::Occupied);
        assert_eq!(spot_one.last_updated, Some(now));
        assert_eq!(spot_one.source_device_id.as_deref(), Some("d1"));
        assert_eq!(snapshot.get(2).expect("spot 2").state, Occupancy::Free);
        assert_eq!(snapshot.get(3).expect("spot 3").state, Occupancy::Unknown);

        let health = store.read_device_health();
        assert_eq!(health["d1"].last_seen, now);
    }

    #[test]
    fn earlier_snapshots_stay_unchanged() {
        let store = store(&[1]);
        let now = Utc::now();
        let before = store.read_snapshot();

        store
            .apply_report(&normalized("d1", &[(1, true)], now), now)
            .expect("apply");

        assert_eq!(before.version(), 0);
        assert_eq!(before.get(1).expect("spot").state, Occupancy::Unknown);
    }

    #[test]
    fn strict_sequencing_rejects_older_reports_but_allows_redelivery() {
        let store = store(&[1]);
        let now = Utc::now();
        let earlier = now - TimeDelta::seconds(5);

        store
            .apply_report(&normalized("d1", &[(1, true)], now), now)
            .expect("first");
        let redelivered = store
            .apply_report(&normalized("d1", &[(1, true)], now), now)
            .expect("redelivery");
        assert_eq!(redelivered, 2);

        let result = store.apply_report(&normalized("d1", &[(1, false)], earlier), now);
        assert_eq!(
            result,
            Err(StoreError::OutOfSequence {
                sent_at: earlier,
                last_sent_at: now,
            })
        );
        let snapshot = store.read_snapshot();
        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.get(1).expect("spot").state, Occupancy::Occupied);
    }

    #[test]
    fn relaxed_sequencing_accepts_older_reports() {
        let store = StateStore::new(&[1].into_iter().collect(), false);
        let now = Utc::now();
        store
            .apply_report(&normalized("d1", &[(1, true)], now), now)
            .expect("first");
        let version = store
            .apply_report(
                &normalized("d1", &[(1, false)], now - TimeDelta::seconds(5)),
                now,
            )
            .expect("older accepted");
        assert_eq!(version, 2);
    }

    #[test]
    fn mark_offline_only_touches_silent_devices() {
        let store = store(&[1, 2, 3]);
        let threshold = TimeDelta::seconds(60);
        let start = Utc::now();
        let later = start + TimeDelta::seconds(45);

        store
            .apply_report(&normalized("d1", &[(1, true)], start), start)
            .expect("d1");
        store
            .apply_report(&normalized("d2", &[(2, false)], later), later)
            .expect("d2");

        let candidates: HashSet<String> = ["d1".to_string(), "d2".to_string()].into();
        let check_at = start + TimeDelta::seconds(61);
        let marked = store
            .mark_offline(&candidates, check_at, threshold)
            .expect("d1 is offline");
        assert_eq!(marked.spots, vec![1]);
        assert_eq!(marked.version, 3);

        let snapshot = store.read_snapshot();
        let spot_one = snapshot.get(1).expect("spot 1");
        assert_eq!(spot_one.state, Occupancy::Unknown);
        assert_eq!(spot_one.source_device_id.as_deref(), Some("d1"));
        assert_eq!(snapshot.get(2).expect("spot 2").state, Occupancy::Free);

        // Nothing new to mark: the version must not move.
        let again = store.mark_offline(&candidates, check_at, threshold);
        assert_eq!(again, None);
        assert_eq!(store.read_snapshot().version(), 3);
    }

    #[test]
    fn mark_offline_skips_devices_that_reported_since() {
        let store = store(&[1]);
        let threshold = TimeDelta::seconds(60);
        let start = Utc::now();
        store
            .apply_report(&normalized("d1", &[(1, true)], start), start)
            .expect("first");
        let fresh = start + TimeDelta::seconds(90);
        store
            .apply_report(&normalized("d1", &[(1, true)], fresh), fresh)
            .expect("second");

        let candidates: HashSet<String> = ["d1".to_string()].into();
        let marked = store.mark_offline(&candidates, fresh + TimeDelta::seconds(1), threshold);
        assert_eq!(marked, None);
    }

    #[test]
    fn panicking_writer_does_not_wedge_the_store() {
        let store = Arc::new(store(&[1]));
        let crashed = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let _writer = store.writer.lock();
                panic!("writer crashed mid-update");
            })
        };
        assert!(crashed.join().is_err());

        let now = Utc::now();
        for attempt in 1..=3u64 {
            let version = store
                .apply_report(&normalized("d1", &[(1, attempt % 2 == 0)], now), now)
                .expect("store keeps accepting reports");
            assert_eq!(version, attempt);
        }
        assert_eq!(store.read_snapshot().version(), 3);
        assert!(store.read_device_health().contains_key("d1"));
    }

    #[test]
    fn subscribers_see_new_versions() {
        let store = store(&[1]);
        let receiver = store.subscribe();
        let now = Utc::now();
        store
            .apply_report(&normalized("d1", &[(1, true)], now), now)
            .expect("apply");
        assert_eq!(*receiver.borrow(), 1);
    }

    #[test]
    fn concurrent_reports_are_never_partially_visible() {
        let ids: Vec<SpotId> = (1..=8).collect();
        let store = Arc::new(store(&ids));
        let now = Utc::now();

        let writers: Vec<_> = (0..4)
            .map(|device| {
                let store = Arc::clone(&store);
                let ids = ids.clone();
                thread::spawn(move || {
                    let device_id = format!("d{device}");
                    for round in 0..50 {
                        let occupied = round % 2 == 0;
                        let readings: Vec<_> = ids.iter().map(|id| (*id, occupied)).collect();
                        store
                            .apply_report(&normalized(&device_id, &readings, now), now)
                            .expect("apply");
                    }
                })
            })
            .collect();

        let reader = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut last_version = 0;
                for _ in 0..500 {
                    let snapshot = store.read_snapshot();
                    assert!(snapshot.version() >= last_version);
                    last_version = snapshot.version();
                    if snapshot.version() == 0 {
                        continue;
                    }
                    // Every report writes all spots, so a consistent snapshot
                    // shows one device and one state across the board.
                    let first = snapshot.get(1).expect("spot 1").clone();
                    assert!(snapshot.spots().all(|spot| spot.state == first.state
                        && spot.source_device_id == first.source_device_id));
                }
            })
        };

        for writer in writers {
            writer.join().expect("writer");
        }
        reader.join().expect("reader");
        assert_eq!(store.read_snapshot().version(), 200);
    }
}
