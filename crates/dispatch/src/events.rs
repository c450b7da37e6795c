//! Domain events and the event bus
//!
//! The engine publishes one [`DispatchEvent`] per successful transition.
//! Subscribers (realtime notifier, external notification fan-out) attach to
//! the [`BroadcastBus`]; tests inject a [`RecordingBus`] instead.

use beacon_core::GeoCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::geofence::{GeofenceEvent, NotificationPayload};
use crate::task::{Task, TaskPriority};

/// Capacity of the broadcast channel backing [`BroadcastBus`]
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Fact emitted by the dispatch engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum DispatchEvent {
    /// New task persisted
    #[serde(rename = "task.created")]
    Created(TaskChanged),

    /// Descriptive fields edited or task soft-deleted
    #[serde(rename = "task.updated")]
    Updated(TaskChanged),

    /// Responders assigned
    #[serde(rename = "task.assigned")]
    Assigned(TaskAssignedPayload),

    /// Work started
    #[serde(rename = "task.started")]
    Started(TaskLifecyclePayload),

    /// Work completed
    #[serde(rename = "task.completed")]
    Completed(TaskLifecyclePayload),

    /// Task cancelled
    #[serde(rename = "task.cancelled")]
    Cancelled(TaskCancelledPayload),

    /// Responder accepted or declined
    #[serde(rename = "task.assignment-response")]
    AssignmentResponse(AssignmentResponsePayload),

    /// Responder checked in on site
    #[serde(rename = "task.checkedIn")]
    CheckedIn(CheckedInPayload),

    /// Responder checked out
    #[serde(rename = "task.checkedOut")]
    CheckedOut(CheckedOutPayload),

    /// Responder crossed a geofence boundary
    #[serde(rename = "geofence.triggered")]
    GeofenceTriggered(GeofenceTriggeredPayload),
}

impl DispatchEvent {
    /// Dotted event name
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::Created(_) => "task.created",
            DispatchEvent::Updated(_) => "task.updated",
            DispatchEvent::Assigned(_) => "task.assigned",
            DispatchEvent::Started(_) => "task.started",
            DispatchEvent::Completed(_) => "task.completed",
            DispatchEvent::Cancelled(_) => "task.cancelled",
            DispatchEvent::AssignmentResponse(_) => "task.assignment-response",
            DispatchEvent::CheckedIn(_) => "task.checkedIn",
            DispatchEvent::CheckedOut(_) => "task.checkedOut",
            DispatchEvent::GeofenceTriggered(_) => "geofence.triggered",
        }
    }

    /// Mission the event belongs to
    pub fn mission_id(&self) -> &str {
        match self {
            DispatchEvent::Created(p) | DispatchEvent::Updated(p) => &p.task.mission_id,
            DispatchEvent::Assigned(p) => &p.mission_id,
            DispatchEvent::Started(p) | DispatchEvent::Completed(p) => &p.mission_id,
            DispatchEvent::Cancelled(p) => &p.mission_id,
            DispatchEvent::AssignmentResponse(p) => &p.mission_id,
            DispatchEvent::CheckedIn(p) => &p.mission_id,
            DispatchEvent::CheckedOut(p) => &p.mission_id,
            DispatchEvent::GeofenceTriggered(p) => &p.mission_id,
        }
    }
}

/// Whole task snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskChanged {
    pub task: Task,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignedPayload {
    pub task_id: String,
    pub mission_id: String,
    pub title: String,
    pub priority: TaskPriority,
    pub volunteer_ids: Vec<String>,
    pub volunteer_names: Vec<String>,
    pub triggered_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Shared payload of `task.started` and `task.completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLifecyclePayload {
    pub task_id: String,
    pub mission_id: String,
    pub title: String,
    pub priority: TaskPriority,
    pub triggered_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCancelledPayload {
    pub task_id: String,
    pub mission_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponsePayload {
    pub task_id: String,
    pub mission_id: String,
    pub volunteer_id: String,
    pub volunteer_name: String,
    pub accepted: bool,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedInPayload {
    pub task_id: String,
    pub volunteer_id: String,
    pub mission_id: String,
    pub location: GeoCoordinate,
    pub distance_meters: Option<u32>,
    pub is_within_range: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckedOutPayload {
    pub task_id: String,
    pub volunteer_id: String,
    pub mission_id: String,
    pub duration_minutes: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceTriggeredPayload {
    pub mission_id: String,
    pub volunteer_id: String,
    pub event: GeofenceEvent,
    pub notification: NotificationPayload,
}

/// Sink for domain events
///
/// Publishing never fails from the caller's point of view; a bus that cannot
/// deliver logs and drops.
pub trait EventBus: Send + Sync {
    /// Publish an event to all subscribers
    fn publish(&self, event: DispatchEvent);
}

/// Event bus backed by a tokio broadcast channel
pub struct BroadcastBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastBus {
    /// Create a bus with [`DEFAULT_BUS_CAPACITY`]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with a custom channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Attach a new subscriber
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Number of attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: DispatchEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!(event = name, "No subscribers for dispatch event");
        }
    }
}

/// Bus that keeps every published event in memory
#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of everything published so far, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(DispatchEvent::name)
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: DispatchEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled() -> DispatchEvent {
        DispatchEvent::Cancelled(TaskCancelledPayload {
            task_id: "t-1".to_string(),
            mission_id: "m-1".to_string(),
        })
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(cancelled()).unwrap();
        assert_eq!(json["event"], "task.cancelled");
        assert_eq!(json["payload"]["taskId"], "t-1");
        assert_eq!(json["payload"]["missionId"], "m-1");
    }

    #[test]
    fn test_name_matches_serde_tag() {
        let event = DispatchEvent::CheckedOut(CheckedOutPayload {
            task_id: "t-1".to_string(),
            volunteer_id: "v-1".to_string(),
            mission_id: "m-1".to_string(),
            duration_minutes: 10,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["payload"]["durationMinutes"], 10);
        assert_eq!(event.mission_id(), "m-1");
    }

    #[test]
    fn test_recording_bus() {
        let bus = RecordingBus::new();
        bus.publish(cancelled());
        assert_eq!(bus.names(), vec!["task.cancelled"]);
        bus.clear();
        assert!(bus.events().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_bus_fans_out() {
        let bus = BroadcastBus::with_capacity(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(cancelled());

        assert_eq!(first.recv().await.unwrap().name(), "task.cancelled");
        assert_eq!(second.recv().await.unwrap().name(), "task.cancelled");
    }

    #[test]
    fn test_broadcast_bus_without_subscribers() {
        let bus = BroadcastBus::new();
        bus.publish(cancelled());
    }
}
