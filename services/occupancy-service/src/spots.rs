use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

pub type SpotId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Occupied,
    Free,
    Unknown,
}

impl Occupancy {
    pub fn from_occupied(occupied: bool) -> Self {
        if occupied {
            Occupancy::Occupied
        } else {
            Occupancy::Free
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Spot {
    pub id: SpotId,
    pub state: Occupancy,
    pub last_updated: Option<DateTime<Utc>>,
    pub source_device_id: Option<String>,
}

impl Spot {
    fn never_reported(id: SpotId) -> Self {
        Self {
            id,
            state: Occupancy::Unknown,
            last_updated: None,
            source_device_id: None,
        }
    }
}

/// One consistent view of every configured spot.
///
/// Snapshots are immutable once published; the store builds the next one
/// from a clone and swaps it in.
#[derive(Clone, Debug, PartialEq)]
pub struct SpotState {
    spots: BTreeMap<SpotId, Spot>,
    version: u64,
}

impl SpotState {
    pub fn new(spot_ids: &BTreeSet<SpotId>) -> Self {
        Self {
            spots: spot_ids
                .iter()
                .map(|id| (*id, Spot::never_reported(*id)))
                .collect(),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: SpotId) -> Option<&Spot> {
        self.spots.get(&id)
    }

    /// Spots in ascending id order.
    pub fn spots(&self) -> impl Iterator<Item = &Spot> {
        self.spots.values()
    }

    pub(crate) fn spot_mut(&mut self, id: SpotId) -> Option<&mut Spot> {
        self.spots.get_mut(&id)
    }

    pub(crate) fn spots_mut(&mut self) -> impl Iterator<Item = &mut Spot> {
        self.spots.values_mut()
    }

    pub(crate) fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Server time of the last accepted report.
    pub last_seen: DateTime<Utc>,
    /// Device-reported `sentAt` of the last accepted report.
    pub last_sent_at: DateTime<Utc>,
}

pub type DeviceHealth = HashMap<String, DeviceRecord>;
