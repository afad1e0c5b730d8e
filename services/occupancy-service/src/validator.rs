use chrono::{DateTime, Utc};

use crate::config::ValidationConfig;
use crate::models::{RawValue, SensorReport};
use crate::spots::SpotId;
use crate::store::StoreError;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("device id is empty")]
    MissingDeviceId,
    #[error("report references no configured spot")]
    UnknownSpots,
    #[error("spot {spot_id} reading cannot be read as a sensor level")]
    InvalidReading { spot_id: SpotId },
    #[error("sentAt {sent_at} is outside the accepted window")]
    StaleOrFutureReport { sent_at: DateTime<Utc> },
    #[error("sentAt {sent_at} is older than the last accepted report at {last_sent_at}")]
    OutOfSequence {
        sent_at: DateTime<Utc>,
        last_sent_at: DateTime<Utc>,
    },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingDeviceId => "missing_device_id",
            RejectReason::UnknownSpots => "unknown_spots",
            RejectReason::InvalidReading { .. } => "invalid_reading",
            RejectReason::StaleOrFutureReport { .. } => "stale_or_future_report",
            RejectReason::OutOfSequence { .. } => "out_of_sequence",
        }
    }
}

impl From<StoreError> for RejectReason {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OutOfSequence {
                sent_at,
                last_sent_at,
            } => RejectReason::OutOfSequence {
                sent_at,
                last_sent_at,
            },
        }
    }
}

/// A report that passed validation: only configured spots, levels already
/// resolved through the deployment's polarity.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedReport {
    pub device_id: String,
    pub readings: Vec<(SpotId, bool)>,
    pub sent_at: DateTime<Utc>,
    /// Spot ids dropped because they are not configured.
    pub ignored: Vec<i64>,
}

pub fn validate(
    report: SensorReport,
    config: &ValidationConfig,
    now: DateTime<Utc>,
) -> Result<NormalizedReport, RejectReason> {
    // The replay window is checked before content so an old report is always
    // classified as stale, whatever else is wrong with it.
    // A window too wide to represent is treated as unbounded on that side.
    let sent_at = report.sent_at;
    let too_new = now
        .checked_add_signed(config.max_clock_skew)
        .is_some_and(|latest| sent_at > latest);
    let too_old = now
        .checked_sub_signed(config.max_report_age)
        .is_some_and(|earliest| sent_at < earliest);
    if too_new || too_old {
        return Err(RejectReason::StaleOrFutureReport { sent_at });
    }

    let device_id = report.device_id.trim();
    if device_id.is_empty() {
        return Err(RejectReason::MissingDeviceId);
    }

    let mut known = Vec::with_capacity(report.spots.len());
    let mut ignored = Vec::new();
    for reading in report.spots {
        let configured = SpotId::try_from(reading.id)
            .ok()
            .filter(|spot_id| config.spot_ids.contains(spot_id));
        match configured {
            Some(spot_id) => known.push((spot_id, reading.value)),
            None => ignored.push(reading.id),
        }
    }
    if known.is_empty() {
        return Err(RejectReason::UnknownSpots);
    }

    let mut readings: Vec<(SpotId, bool)> = Vec::with_capacity(known.len());
    for (spot_id, value) in known {
        let level_high = level(&value, config.occupied_threshold)
            .ok_or(RejectReason::InvalidReading { spot_id })?;
        let occupied = config.polarity.occupied(level_high);
        // Later readings for the same spot win.
        match readings.iter_mut().find(|(id, _)| *id == spot_id) {
            Some(existing) => existing.1 = occupied,
            None => readings.push((spot_id, occupied)),
        }
    }

    Ok(NormalizedReport {
        device_id: device_id.to_string(),
        readings,
        sent_at,
        ignored,
    })
}

/// Resolves a raw reading to a signal level; `None` when it is not a level.
fn level(value: &RawValue, threshold: f64) -> Option<bool> {
    match value {
        RawValue::Bool(high) => Some(*high),
        RawValue::Number(raw) if raw.is_finite() => Some(*raw >= threshold),
        RawValue::Number(_) => None,
        RawValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "high" => Some(true),
            "0" | "false" | "low" => Some(false),
            _ => None,
        },
    }
}
