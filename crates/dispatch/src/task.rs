//! Task lifecycle management
//!
//! A task moves `draft -> pending -> accepted -> in_progress -> completed`,
//! with `cancelled` reachable from every non-terminal state. Each status
//! change is appended to a BLAKE3-chained transition trail so the history of
//! a task can be audited after the fact.

use beacon_core::GeoCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DispatchError, DispatchResult};

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet actionable
    Draft,
    /// At least one responder has been asked
    Pending,
    /// Assigned by an operator without a response yet
    Assigned,
    /// A responder has accepted
    Accepted,
    /// Work is under way in the field
    InProgress,
    /// Work finished
    Completed,
    /// Withdrawn before completion
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Draft,
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::Accepted,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::Cancelled,
    ];

    /// Check if state is terminal (completed or cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Check if transition to new state is valid
    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        match (self, new_status) {
            (TaskStatus::Draft, TaskStatus::Pending) => true,
            (TaskStatus::Pending, TaskStatus::Assigned) => true,
            (TaskStatus::Pending, TaskStatus::Accepted) => true,
            (TaskStatus::Assigned, TaskStatus::Accepted) => true,
            (TaskStatus::Accepted, TaskStatus::InProgress) => true,
            (TaskStatus::InProgress, TaskStatus::Completed) => true,
            // Cancellation from any non-terminal state
            (from, TaskStatus::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Accepted => "accepted",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

/// Kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Search and rescue
    Rescue,
    /// Medical aid
    Medical,
    /// Supply movement
    Logistics,
    /// Communications support
    Communication,
    /// Moving people out of danger
    Evacuation,
    /// Damage or needs assessment
    Assessment,
    /// Anything else
    #[default]
    Other,
}

/// Task urgency, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Can wait
    Low,
    /// Normal urgency
    #[default]
    Medium,
    /// Should be handled soon
    High,
    /// Life or property at risk
    Critical,
    /// Immediate response required
    Emergency,
}

impl TaskPriority {
    /// Every priority, least urgent first
    pub const ALL: [TaskPriority; 5] = [
        TaskPriority::Low,
        TaskPriority::Medium,
        TaskPriority::High,
        TaskPriority::Critical,
        TaskPriority::Emergency,
    ];

    /// Wire name of the priority
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
            TaskPriority::Emergency => "emergency",
        }
    }

    /// Parse a wire name
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }
}

/// Dispatch task scoped to a mission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: String,

    /// Mission this task belongs to
    pub mission_id: String,

    /// Short title shown on task cards
    pub title: String,

    /// Free-text description
    pub description: String,

    /// Task category
    pub category: TaskCategory,

    /// Task priority
    pub priority: TaskPriority,

    /// Task site (optional)
    pub location: Option<GeoCoordinate>,

    /// Human-readable location hint
    pub location_description: Option<String>,

    /// Skill tags responders should have
    pub required_skills: Vec<String>,

    /// Resource tags the task needs
    pub required_resources: Vec<String>,

    /// Deadline (optional)
    pub due_at: Option<DateTime<Utc>>,

    /// Expected effort in minutes
    pub estimated_duration_minutes: Option<u32>,

    /// Current state
    pub status: TaskStatus,

    /// Creator identifier
    pub created_by: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft-delete timestamp
    pub deleted_at: Option<DateTime<Utc>>,

    /// When work started
    pub started_at: Option<DateTime<Utc>>,

    /// When work completed
    pub completed_at: Option<DateTime<Utc>>,

    /// Adjunct facts (cancellation reason, completion notes)
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Optimistic concurrency version, bumped by the store on every update
    pub version: u64,

    /// State transition history
    pub transitions: Vec<TaskTransition>,
}

impl Task {
    /// Create a new draft task
    pub fn new(
        id: String,
        mission_id: String,
        title: String,
        created_by: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let genesis = TaskTransition::new(
            id.clone(),
            None,
            TaskStatus::Draft,
            Some(created_by.clone()),
            timestamp,
            TaskTransition::genesis_hash(),
        );

        Self {
            id,
            mission_id,
            title,
            description: String::new(),
            category: TaskCategory::default(),
            priority: TaskPriority::default(),
            location: None,
            location_description: None,
            required_skills: Vec::new(),
            required_resources: Vec::new(),
            due_at: None,
            estimated_duration_minutes: None,
            status: TaskStatus::Draft,
            created_by,
            created_at: timestamp,
            updated_at: timestamp,
            deleted_at: None,
            started_at: None,
            completed_at: None,
            metadata: BTreeMap::new(),
            version: 0,
            transitions: vec![genesis],
        }
    }

    /// Transition to a new state, recording it in the trail
    pub fn transition(
        &mut self,
        new_status: TaskStatus,
        actor: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> DispatchResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(DispatchError::precondition(format!(
                "invalid task transition from {} to {}",
                self.status.as_str(),
                new_status.as_str()
            )));
        }

        let prev_hash = self
            .last_transition()
            .map(|t| t.hash.clone())
            .unwrap_or_else(TaskTransition::genesis_hash);

        let transition = TaskTransition::new(
            self.id.clone(),
            Some(self.status),
            new_status,
            actor.map(str::to_string),
            timestamp,
            prev_hash,
        );

        self.status = new_status;
        self.updated_at = timestamp;
        self.transitions.push(transition);

        match new_status {
            TaskStatus::InProgress => self.started_at = Some(timestamp),
            TaskStatus::Completed => self.completed_at = Some(timestamp),
            _ => {}
        }

        Ok(())
    }

    /// Check if the task is soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Check if the task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if the task ever held `status`
    pub fn has_passed_through(&self, status: TaskStatus) -> bool {
        self.transitions.iter().any(|t| t.to_status == status)
    }

    /// Get the last transition
    pub fn last_transition(&self) -> Option<&TaskTransition> {
        self.transitions.last()
    }

    /// Re-derive every hash in the trail and check the chain links
    pub fn verify_transitions(&self) -> bool {
        let mut expected_prev = TaskTransition::genesis_hash();
        for transition in &self.transitions {
            if transition.prev_hash != expected_prev || !transition.verify_hash() {
                return false;
            }
            expected_prev = transition.hash.clone();
        }
        true
    }

    /// Set a metadata entry
    pub fn set_metadata(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// Task state transition with hash-chain link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransition {
    /// Task ID this transition belongs to
    pub task_id: String,

    /// Previous state (`None` for the creation entry)
    pub from_status: Option<TaskStatus>,

    /// New state
    pub to_status: TaskStatus,

    /// Who caused the transition, when known
    pub actor: Option<String>,

    /// Transition timestamp
    pub at: DateTime<Utc>,

    /// Hex BLAKE3 hash of the previous transition
    pub prev_hash: String,

    /// Hex BLAKE3 hash of this transition
    pub hash: String,
}

impl TaskTransition {
    /// Create a new transition and compute its hash
    pub fn new(
        task_id: String,
        from_status: Option<TaskStatus>,
        to_status: TaskStatus,
        actor: Option<String>,
        at: DateTime<Utc>,
        prev_hash: String,
    ) -> Self {
        let mut transition = Self {
            task_id,
            from_status,
            to_status,
            actor,
            at,
            prev_hash,
            hash: String::new(),
        };

        transition.hash = transition.compute_hash();
        transition
    }

    /// Hash linking the first transition of every trail
    pub fn genesis_hash() -> String {
        hex::encode([0u8; 32])
    }

    /// Compute BLAKE3 hash of this transition
    pub fn compute_hash(&self) -> String {
        let from_byte = self.from_status.map(|s| s as u8 + 1).unwrap_or(0);

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.task_id.as_bytes());
        hasher.update(&[from_byte]);
        hasher.update(&[self.to_status as u8 + 1]);
        hasher.update(&self.at.timestamp_millis().to_le_bytes());
        hasher.update(self.actor.as_deref().unwrap_or("").as_bytes());
        hasher.update(self.prev_hash.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Verify hash matches computed hash
    pub fn verify_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }
}
