use std::{collections::BTreeSet, env, fmt, time::Duration};

use chrono::TimeDelta;
use parkwatch_common::{env_flag, env_or, parse_list};

use crate::spots::SpotId;

/// Upper bound for any configured time window: one year.
const MAX_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("SPOT_IDS is required")]
    MissingSpotIds,
    #[error("SPOT_IDS contains an invalid id: {0:?}")]
    InvalidSpotId(String),
    #[error("SPOT_IDS lists spot {0} more than once")]
    DuplicateSpotId(SpotId),
    #[error("SENSOR_POLARITY must be active_high or active_low, got {0:?}")]
    InvalidPolarity(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
    #[error("OCCUPIED_THRESHOLD must be a finite number")]
    InvalidThreshold,
}

/// How a raw sensor level maps onto occupancy. Depends on sensor wiring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    /// A high signal means a vehicle is present.
    ActiveHigh,
    /// A low signal means a vehicle is present (typical for IR obstacle modules).
    ActiveLow,
}

impl Polarity {
    pub fn occupied(self, level_high: bool) -> bool {
        match self {
            Polarity::ActiveHigh => level_high,
            Polarity::ActiveLow => !level_high,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Polarity::ActiveHigh => "active_high",
            Polarity::ActiveLow => "active_low",
        };
        write!(f, "{value}")
    }
}

impl std::str::FromStr for Polarity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active_high" | "active-high" | "high" => Ok(Polarity::ActiveHigh),
            "active_low" | "active-low" | "low" => Ok(Polarity::ActiveLow),
            _ => Err(()),
        }
    }
}

/// Rules the validator applies to every report.
#[derive(Clone, Debug)]
pub struct ValidationConfig {
    pub spot_ids: BTreeSet<SpotId>,
    pub polarity: Polarity,
    pub occupied_threshold: f64,
    pub max_clock_skew: TimeDelta,
    pub max_report_age: TimeDelta,
}

#[derive(Clone, Debug)]
pub struct OccupancyConfig {
    pub port: u16,
    pub validation: ValidationConfig,
    pub offline_threshold: TimeDelta,
    pub scan_interval: Duration,
    pub strict_sequencing: bool,
    pub request_timeout: Duration,
    pub max_body_bytes: usize,
    pub stream_interval: Duration,
}

impl OccupancyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_ids = env::var("SPOT_IDS").map_err(|_| ConfigError::MissingSpotIds)?;
        let spot_ids = spot_ids_from(&raw_ids)?;

        let polarity = match env::var("SENSOR_POLARITY") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidPolarity(value.clone()))?,
            Err(_) => Polarity::ActiveHigh,
        };
        let occupied_threshold = env_or("OCCUPIED_THRESHOLD", 0.5f64);
        if !occupied_threshold.is_finite() {
            return Err(ConfigError::InvalidThreshold);
        }

        let scan_interval_secs = env_or("STALENESS_SCAN_INTERVAL_SECS", 5u64);
        if scan_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("STALENESS_SCAN_INTERVAL_SECS"));
        }
        let offline_threshold = window_secs("OFFLINE_THRESHOLD_SECS", 60)?;
        if offline_threshold.is_zero() {
            return Err(ConfigError::ZeroDuration("OFFLINE_THRESHOLD_SECS"));
        }
        let stream_interval_ms = env_or("STREAM_INTERVAL_MS", 5000u64);
        if stream_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("STREAM_INTERVAL_MS"));
        }

        Ok(Self {
            port: env_or("PORT", 8080u16),
            validation: ValidationConfig {
                spot_ids,
                polarity,
                occupied_threshold,
                max_clock_skew: window_secs("MAX_CLOCK_SKEW_SECS", 30)?,
                max_report_age: window_secs("MAX_REPORT_AGE_SECS", 300)?,
            },
            offline_threshold,
            scan_interval: Duration::from_secs(scan_interval_secs),
            strict_sequencing: env_flag("STRICT_SEQUENCING", true),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 10u64).max(1)),
            max_body_bytes: env_or("MAX_BODY_BYTES", 16 * 1024usize),
            stream_interval: Duration::from_millis(stream_interval_ms),
        })
    }
}

fn window_secs(key: &'static str, default: u32) -> Result<TimeDelta, ConfigError> {
    let secs = env_or(key, u64::from(default));
    if secs > MAX_WINDOW_SECS {
        return Err(ConfigError::OutOfRange(key));
    }
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or(ConfigError::OutOfRange(key))
}

fn spot_ids_from(raw: &str) -> Result<BTreeSet<SpotId>, ConfigError> {
    let ids: Vec<SpotId> = parse_list(raw).map_err(ConfigError::InvalidSpotId)?;
    if ids.is_empty() {
        return Err(ConfigError::MissingSpotIds);
    }

    let mut spot_ids = BTreeSet::new();
    for id in ids {
        if !spot_ids.insert(id) {
            return Err(ConfigError::DuplicateSpotId(id));
        }
    }
    Ok(spot_ids)
}

#[cfg(test)]
pub(crate) fn test_config(spot_ids: &[SpotId]) -> OccupancyConfig {
    OccupancyConfig {
        port: 0,
        validation: ValidationConfig {
            spot_ids: spot_ids.iter().copied().collect(),
            polarity: Polarity::ActiveHigh,
            occupied_threshold: 0.5,
            max_clock_skew: TimeDelta::seconds(30),
            max_report_age: TimeDelta::seconds(300),
        },
        offline_threshold: TimeDelta::seconds(60),
        scan_interval: Duration::from_secs(5),
        strict_sequencing: true,
        request_timeout: Duration::from_secs(10),
        max_body_bytes: 16 * 1024,
        stream_interval: Duration::from_millis(5000),
    }
}
