//! Responder assignments and attendance facts

use beacon_core::GeoCoordinate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Assignment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Waiting for the responder to answer
    Pending,
    /// Responder took the task
    Accepted,
    /// Responder turned the task down
    Declined,
    /// Responder finished their part
    Completed,
    /// Withdrawn because the task was cancelled
    Cancelled,
}

impl AssignmentStatus {
    /// Check if transition to new state is valid
    pub fn can_transition_to(&self, new_status: AssignmentStatus) -> bool {
        matches!(
            (self, new_status),
            (AssignmentStatus::Pending, AssignmentStatus::Accepted)
                | (AssignmentStatus::Pending, AssignmentStatus::Declined)
                | (AssignmentStatus::Pending, AssignmentStatus::Cancelled)
                | (AssignmentStatus::Accepted, AssignmentStatus::Completed)
                | (AssignmentStatus::Accepted, AssignmentStatus::Cancelled)
        )
    }

    /// Pending or accepted; the states a cancellation cascades over
    pub fn is_live(&self) -> bool {
        matches!(self, AssignmentStatus::Pending | AssignmentStatus::Accepted)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Declined => "declined",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Cancelled => "cancelled",
        }
    }
}

/// GPS check-in and check-out facts for one assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// When the responder checked in
    pub check_in_at: DateTime<Utc>,
    /// Reported check-in position
    pub check_in_location: GeoCoordinate,
    /// Distance to the task site; `None` when the task has no location
    pub distance_meters: Option<u32>,
    /// Whether the check-in fell inside the configured radius
    pub is_within_range: bool,
    /// Free-text note supplied at check-in
    pub check_in_note: Option<String>,
    /// When the responder checked out
    pub check_out_at: Option<DateTime<Utc>>,
    /// Reported check-out position
    pub check_out_location: Option<GeoCoordinate>,
    /// Whole minutes between check-in and check-out
    pub duration_minutes: Option<u32>,
    /// Free-text notes supplied at check-out
    pub check_out_notes: Option<String>,
}

impl AttendanceRecord {
    /// Check if a check-out has been recorded
    pub fn is_checked_out(&self) -> bool {
        self.check_out_at.is_some()
    }
}

/// Relation between one task and one responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique assignment identifier
    pub id: String,
    /// Task this assignment belongs to
    pub task_id: String,
    /// Assigned responder
    pub responder_id: String,
    /// Responder display name at assignment time
    pub responder_name: String,
    /// Current state
    pub status: AssignmentStatus,
    /// Operator who made the assignment
    pub assigned_by: String,
    /// Assignment timestamp
    pub assigned_at: DateTime<Utc>,
    /// When the responder accepted or declined
    pub responded_at: Option<DateTime<Utc>>,
    /// When the assignment completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Reason given when declining
    pub decline_reason: Option<String>,
    /// Notes given when completing
    pub completion_notes: Option<String>,
    /// Note given when accepting
    pub accept_note: Option<String>,
    /// Check-in/out facts, present once the responder checked in
    pub attendance: Option<AttendanceRecord>,
    /// Optimistic concurrency version, bumped by the store on every update
    pub version: u64,
}

impl Assignment {
    /// Create a pending assignment
    pub fn new(
        id: String,
        task_id: String,
        responder_id: String,
        responder_name: String,
        assigned_by: String,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_id,
            responder_id,
            responder_name,
            status: AssignmentStatus::Pending,
            assigned_by,
            assigned_at,
            responded_at: None,
            completed_at: None,
            decline_reason: None,
            completion_notes: None,
            accept_note: None,
            attendance: None,
            version: 0,
        }
    }

    /// Check if the responder has checked in
    pub fn is_checked_in(&self) -> bool {
        self.attendance.is_some()
    }
}
