//! Beacon task dispatch
//!
//! Task and assignment lifecycles for emergency-response missions: the
//! [`DispatchEngine`] owns every transition, persists through the
//! [`TaskStore`]/[`AssignmentStore`] traits and announces each change on an
//! [`EventBus`].
//!
//! # Example
//! ```no_run
//! use beacon_dispatch::{BroadcastBus, CreateTaskInput, DispatchEngine, MemoryStore};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let bus = Arc::new(BroadcastBus::new());
//! let engine = DispatchEngine::with_store(Arc::new(MemoryStore::new()), bus);
//!
//! let task = engine
//!     .create_task(
//!         CreateTaskInput {
//!             mission_id: "mission-001".to_string(),
//!             title: "Deliver water to shelter".to_string(),
//!             ..Default::default()
//!         },
//!         "commander-1",
//!     )
//!     .unwrap();
//!
//! let names: HashMap<String, String> = HashMap::new();
//! engine
//!     .assign_task(&task.id, &["vol-7".to_string()], "commander-1", &names)
//!     .unwrap();
//! ```

pub mod assignment;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod geofence;
pub mod input;
pub mod store;
pub mod task;

pub use assignment::{Assignment, AssignmentStatus, AttendanceRecord};
pub use directory::{ResponderDirectory, UNKNOWN_RESPONDER};
pub use engine::DispatchEngine;
pub use error::{DispatchError, DispatchResult, StoreError, StoreResult};
pub use events::{BroadcastBus, DispatchEvent, EventBus, RecordingBus};
pub use geofence::{
    CrossingKind, GeofenceEvent, GeofenceRegistry, GeofenceZone, NotificationPayload, ZoneType,
};
pub use input::{
    CheckInInput, CheckInResult, CheckOutInput, CheckOutResult, CreateTaskInput, MissionStats,
    TaskDetail, TaskFilter, UpdateTaskInput,
};
pub use store::{AssignmentStore, MemoryStore, SqliteStore, TaskStore};
pub use task::{Task, TaskCategory, TaskPriority, TaskStatus, TaskTransition};
