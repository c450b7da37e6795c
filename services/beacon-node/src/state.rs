use beacon_core::Config;
use beacon_dispatch::{BroadcastBus, DispatchEngine, GeofenceRegistry, MemoryStore, SqliteStore};
use std::sync::Arc;
use tracing::info;

pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub bus: Arc<BroadcastBus>,
}

impl AppState {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let bus = Arc::new(BroadcastBus::new());
        let geofences = Arc::new(GeofenceRegistry::new());

        let engine = match &config.storage.sqlite_path {
            Some(path) => {
                info!(path = %path.display(), "Opening SQLite task store");
                DispatchEngine::with_store(Arc::new(SqliteStore::open(path)?), bus.clone())
            }
            None => {
                info!("Using in-memory task store");
                DispatchEngine::with_store(Arc::new(MemoryStore::new()), bus.clone())
            }
        }
        .with_config(config.dispatch.clone())
        .with_geofences(geofences);

        Ok(AppState {
            engine: Arc::new(engine),
            bus,
        })
    }
}
