//! Shared fixtures for the integration tests

use beacon_core::{DispatchConfig, GeoCoordinate, ManualClock};
use beacon_dispatch::{
    AssignmentStore, BroadcastBus, CreateTaskInput, DispatchEngine, EventBus, GeofenceRegistry,
    Task, TaskPriority, TaskStore,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Once};

pub const MISSION: &str = "mission-typhoon";
pub const COMMANDER: &str = "cmdr-lin";

/// Task site used across scenarios
pub const SITE: GeoCoordinate = GeoCoordinate {
    latitude: 25.04,
    longitude: 121.55,
};

/// A check-in position roughly 150 m from [`SITE`]
pub const NEAR_SITE: GeoCoordinate = GeoCoordinate {
    latitude: 25.041,
    longitude: 121.551,
};

static TRACING: Once = Once::new();

/// Install a test subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fixed scenario start, 2024-09-01 08:00 UTC
pub fn scenario_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Unique database path under the system temp directory
pub fn temp_db_path() -> PathBuf {
    std::env::temp_dir()
        .join("beacon-it")
        .join(format!("{}.db", uuid::Uuid::new_v4()))
}

/// Responder display names known to the command room
pub fn roster() -> HashMap<String, String> {
    [
        ("vol-chen", "陳志明"),
        ("vol-wang", "王美玲"),
        ("vol-lee", "李大華"),
    ]
    .into_iter()
    .map(|(id, name)| (id.to_string(), name.to_string()))
    .collect()
}

/// Engine wired to a broadcast bus and a manual clock
pub struct Harness {
    pub engine: DispatchEngine,
    pub bus: Arc<BroadcastBus>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + AssignmentStore + 'static,
    {
        init_tracing();
        let bus = Arc::new(BroadcastBus::new());
        let clock = Arc::new(ManualClock::new(scenario_start()));
        let engine = DispatchEngine::with_store(store, bus.clone() as Arc<dyn EventBus>)
            .with_clock(clock.clone())
            .with_config(DispatchConfig::default());
        Self { engine, bus, clock }
    }

    /// Attach a geofence registry to the engine
    pub fn with_geofences(mut self, registry: Arc<GeofenceRegistry>) -> Self {
        self.engine = self.engine.with_geofences(registry);
        self
    }

    /// Create a high-priority task at [`SITE`]
    pub fn located_task(&self, title: &str) -> Task {
        self.engine
            .create_task(
                CreateTaskInput {
                    mission_id: MISSION.to_string(),
                    title: title.to_string(),
                    priority: Some(TaskPriority::High),
                    location: Some(SITE),
                    ..Default::default()
                },
                COMMANDER,
            )
            .expect("task creation")
    }

    /// Assign one responder and have them accept
    pub fn assign_and_accept(&self, task_id: &str, responder_id: &str) {
        self.engine
            .assign_task(task_id, &[responder_id.to_string()], COMMANDER, &roster())
            .expect("assign");
        self.engine
            .accept_assignment(task_id, responder_id, None)
            .expect("accept");
    }
}
