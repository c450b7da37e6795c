//! Task and assignment persistence
//!
//! Both traits are synchronous; every update is a compare-and-swap on the
//! record's `version`. An update succeeds only when the stored version equals
//! the version on the passed record, and the returned record carries the
//! bumped version.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::assignment::{Assignment, AssignmentStatus};
use crate::error::StoreResult;
use crate::input::TaskFilter;
use crate::task::Task;

/// Task persistence
pub trait TaskStore: Send + Sync {
    /// Persist a new task
    fn insert_task(&self, task: &Task) -> StoreResult<()>;

    /// Load a task by id, including soft-deleted ones
    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>>;

    /// Version-checked update; returns the stored record
    fn update_task(&self, task: &Task) -> StoreResult<Task>;

    /// Non-deleted tasks of a mission matching `filter`
    fn find_by_mission_and_status(
        &self,
        mission_id: &str,
        filter: &TaskFilter,
    ) -> StoreResult<Vec<Task>>;
}

/// Assignment persistence
pub trait AssignmentStore: Send + Sync {
    /// Persist a new assignment; fails with `DuplicateAssignment` when the
    /// (task, responder) pair already exists
    fn insert_assignment(&self, assignment: &Assignment) -> StoreResult<()>;

    fn find_by_task_and_responder(
        &self,
        task_id: &str,
        responder_id: &str,
    ) -> StoreResult<Option<Assignment>>;

    /// All assignments of a task, oldest first
    fn find_by_task(&self, task_id: &str) -> StoreResult<Vec<Assignment>>;

    /// Assignments of a responder whose status is in `statuses`
    fn find_by_responder(
        &self,
        responder_id: &str,
        statuses: &[AssignmentStatus],
    ) -> StoreResult<Vec<Assignment>>;

    /// Version-checked update; returns the stored record
    fn update_assignment(&self, assignment: &Assignment) -> StoreResult<Assignment>;
}
