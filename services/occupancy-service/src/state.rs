use std::sync::Arc;

use crate::config::OccupancyConfig;
use crate::stats::IngestStats;
use crate::store::StateStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub config: Arc<OccupancyConfig>,
    pub stats: Arc<IngestStats>,
}

impl AppState {
    pub fn new(config: OccupancyConfig) -> Self {
        let store = StateStore::new(&config.validation.spot_ids, config.strict_sequencing);
        Self {
            store: Arc::new(store),
            config: Arc::new(config),
            stats: Arc::new(IngestStats::default()),
        }
    }
}
