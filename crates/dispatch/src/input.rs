//! Operation inputs, filters and results

use beacon_core::GeoCoordinate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::assignment::Assignment;
use crate::task::{Task, TaskCategory, TaskPriority, TaskStatus};

/// Fields accepted when creating a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    /// Owning mission; may be supplied by the route instead of the body
    #[serde(default)]
    pub mission_id: String,
    /// Short title
    pub title: String,
    /// Free-text description
    #[serde(default)]
    pub description: String,
    /// Category, `other` when absent
    #[serde(default)]
    pub category: Option<TaskCategory>,
    /// Priority, `medium` when absent
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Task site
    #[serde(default)]
    pub location: Option<GeoCoordinate>,
    /// Human-readable location hint
    #[serde(default)]
    pub location_description: Option<String>,
    /// Skill tags
    #[serde(default)]
    pub required_skills: Vec<String>,
    /// Resource tags
    #[serde(default)]
    pub required_resources: Vec<String>,
    /// RFC 3339 deadline
    #[serde(default)]
    pub due_at: Option<String>,
    /// Expected effort in minutes
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,
    /// Adjunct facts
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Patch applied by `update_task`; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<TaskCategory>,
    pub priority: Option<TaskPriority>,
    pub location: Option<GeoCoordinate>,
    pub location_description: Option<String>,
    pub required_skills: Option<Vec<String>>,
    pub required_resources: Option<Vec<String>>,
    pub due_at: Option<String>,
    pub estimated_duration_minutes: Option<u32>,
}

impl UpdateTaskInput {
    /// Check if the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.priority.is_none()
            && self.location.is_none()
            && self.location_description.is_none()
            && self.required_skills.is_none()
            && self.required_resources.is_none()
            && self.due_at.is_none()
            && self.estimated_duration_minutes.is_none()
    }
}

/// Position reported at check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInInput {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub note: Option<String>,
}

/// Optional position and notes reported at check-out
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutInput {
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Mission task query filter
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    /// Check if `task` passes the filter
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
    }
}

/// Task together with all of its assignments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub assignments: Vec<Assignment>,
}

/// Per-mission task counts, every status and priority present
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStats {
    pub mission_id: String,
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_priority: BTreeMap<TaskPriority, usize>,
}

impl MissionStats {
    /// Zero-filled stats for a mission
    pub fn empty(mission_id: &str) -> Self {
        Self {
            mission_id: mission_id.to_string(),
            total: 0,
            by_status: TaskStatus::ALL.into_iter().map(|s| (s, 0)).collect(),
            by_priority: TaskPriority::ALL.into_iter().map(|p| (p, 0)).collect(),
        }
    }

    /// Count one task
    pub fn record(&mut self, task: &Task) {
        self.total += 1;
        *self.by_status.entry(task.status).or_insert(0) += 1;
        *self.by_priority.entry(task.priority).or_insert(0) += 1;
    }
}

/// Outcome of a check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResult {
    pub success: bool,
    pub assignment: Assignment,
    pub message: String,
    pub distance_meters: Option<u32>,
    pub is_within_range: bool,
}

/// Outcome of a check-out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutResult {
    pub success: bool,
    pub assignment: Assignment,
    pub duration_minutes: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_stats_zero_filled() {
        let stats = MissionStats::empty("m-1");
        assert_eq!(stats.by_status.len(), TaskStatus::ALL.len());
        assert_eq!(stats.by_priority.len(), TaskPriority::ALL.len());
        assert!(stats.by_status.values().all(|n| *n == 0));
    }

    #[test]
    fn test_stats_json_keys_are_wire_names() {
        let mut stats = MissionStats::empty("m-1");
        let task = Task::new(
            "t-1".to_string(),
            "m-1".to_string(),
            "Triage".to_string(),
            "cmdr".to_string(),
            Utc::now(),
        );
        stats.record(&task);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["byStatus"]["draft"], 1);
        assert_eq!(json["byStatus"]["in_progress"], 0);
        assert_eq!(json["byPriority"]["medium"], 1);
    }

    #[test]
    fn test_filter_matches() {
        let task = Task::new(
            "t-1".to_string(),
            "m-1".to_string(),
            "Triage".to_string(),
            "cmdr".to_string(),
            Utc::now(),
        );
        assert!(TaskFilter::default().matches(&task));
        assert!(TaskFilter {
            status: Some(TaskStatus::Draft),
            priority: None
        }
        .matches(&task));
        assert!(!TaskFilter {
            status: None,
            priority: Some(TaskPriority::High)
        }
        .matches(&task));
    }

    #[test]
    fn test_create_input_from_camel_case() {
        let input: CreateTaskInput = serde_json::from_value(serde_json::json!({
            "missionId": "m-1",
            "title": "Deliver water",
            "priority": "high",
            "location": { "latitude": 25.04, "longitude": 121.55 },
            "dueAt": "2024-09-01T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(input.mission_id, "m-1");
        assert_eq!(input.priority, Some(TaskPriority::High));
        assert!(input.category.is_none());
        assert_eq!(input.due_at.as_deref(), Some("2024-09-01T10:00:00Z"));
    }
}
