use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::IngestStatsResponse;
use crate::validator::RejectReason;

/// Ingest outcome counters. Relaxed ordering: each counter is independent.
#[derive(Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    malformed: AtomicU64,
    rejected_missing_device_id: AtomicU64,
    rejected_unknown_spots: AtomicU64,
    rejected_invalid_reading: AtomicU64,
    rejected_stale_or_future: AtomicU64,
    rejected_out_of_sequence: AtomicU64,
    partial_unknown_spots: AtomicU64,
    spots_marked_unknown: AtomicU64,
}

impl IngestStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, reason: &RejectReason) {
        let counter = match reason {
            RejectReason::MissingDeviceId => &self.rejected_missing_device_id,
            RejectReason::UnknownSpots => &self.rejected_unknown_spots,
            RejectReason::InvalidReading { .. } => &self.rejected_invalid_reading,
            RejectReason::StaleOrFutureReport { .. } => &self.rejected_stale_or_future,
            RejectReason::OutOfSequence { .. } => &self.rejected_out_of_sequence,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_unknown(&self) {
        self.partial_unknown_spots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_marked_unknown(&self, spots: usize) {
        self.spots_marked_unknown
            .fetch_add(spots as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestStatsResponse {
        IngestStatsResponse {
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected_missing_device_id: self.rejected_missing_device_id.load(Ordering::Relaxed),
            rejected_unknown_spots: self.rejected_unknown_spots.load(Ordering::Relaxed),
            rejected_invalid_reading: self.rejected_invalid_reading.load(Ordering::Relaxed),
            rejected_stale_or_future: self.rejected_stale_or_future.load(Ordering::Relaxed),
            rejected_out_of_sequence: self.rejected_out_of_sequence.load(Ordering::Relaxed),
            partial_unknown_spots: self.partial_unknown_spots.load(Ordering::Relaxed),
            spots_marked_unknown: self.spots_marked_unknown.load(Ordering::Relaxed),
        }
    }
}
