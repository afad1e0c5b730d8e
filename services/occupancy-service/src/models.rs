use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::spots::Spot;

/// Milliseconds-since-epoch values start around here; anything smaller is seconds.
const EPOCH_MILLIS_FLOOR: f64 = 1e12;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReport {
    pub device_id: String,
    pub spots: Vec<SpotReading>,
    #[serde(deserialize_with = "deserialize_sent_at")]
    pub sent_at: DateTime<Utc>,
}

/// `id` is kept wide so an out-of-range id is dropped as unknown instead of
/// failing the whole report.
#[derive(Debug, Deserialize)]
pub struct SpotReading {
    pub id: i64,
    pub value: RawValue,
}

/// Sensor level as sent by the firmware, before polarity is applied.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SentAtWire {
    Epoch(f64),
    Text(String),
}

fn deserialize_sent_at<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match SentAtWire::deserialize(deserializer)? {
        SentAtWire::Epoch(value) => epoch_to_datetime(value)
            .ok_or_else(|| D::Error::custom(format!("sentAt {value} is not a valid epoch"))),
        SentAtWire::Text(text) => DateTime::parse_from_rfc3339(text.trim())
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|err| D::Error::custom(format!("sentAt {text:?} is not RFC 3339: {err}"))),
    }
}

fn epoch_to_datetime(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let millis = if value.abs() >= EPOCH_MILLIS_FLOOR {
        value
    } else {
        value * 1000.0
    };
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis.round() as i64)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub status: &'static str,
    pub version: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored_spots: Vec<i64>,
}

#[derive(Serialize)]
pub struct RejectResponse {
    pub status: &'static str,
    pub reason: &'static str,
    pub message: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub code: &'static str,
    pub message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotsQuery {
    pub if_version_greater_than: Option<u64>,
}

#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub spots: Vec<Spot>,
    pub version: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnchangedResponse {
    pub status: &'static str,
    pub version: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    pub last_seen: DateTime<Utc>,
    pub last_sent_at: DateTime<Utc>,
    pub online: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicesResponse {
    pub devices: Vec<DeviceSummary>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStatsResponse {
    pub accepted: u64,
    pub malformed: u64,
    pub rejected_missing_device_id: u64,
    pub rejected_unknown_spots: u64,
    pub rejected_invalid_reading: u64,
    pub rejected_stale_or_future: u64,
    pub rejected_out_of_sequence: u64,
    pub partial_unknown_spots: u64,
    pub spots_marked_unknown: u64,
}
