//! In-memory store used by tests and single-process deployments

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{AssignmentStore, TaskStore};
use crate::assignment::{Assignment, AssignmentStatus};
use crate::error::{StoreError, StoreResult};
use crate::input::TaskFilter;
use crate::task::Task;

#[derive(Default)]
struct Tables {
    tasks: HashMap<String, Task>,
    // (task_id, responder_id) -> assignment
    assignments: HashMap<(String, String), Assignment>,
}

/// Both stores over a single mutex-guarded map set
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl TaskStore for MemoryStore {
    fn insert_task(&self, task: &Task) -> StoreResult<()> {
        self.lock()?.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    fn get_task(&self, task_id: &str) -> StoreResult<Option<Task>> {
        Ok(self.lock()?.tasks.get(task_id).cloned())
    }

    fn update_task(&self, task: &Task) -> StoreResult<Task> {
        let mut tables = self.lock()?;
        let stored = tables
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StoreError::Missing {
                entity: "task",
                id: task.id.clone(),
            })?;

        if stored.version != task.version {
            return Err(StoreError::VersionConflict {
                entity: "task",
                id: task.id.clone(),
                expected: task.version,
            });
        }

        let mut next = task.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }

    fn find_by_mission_and_status(
        &self,
        mission_id: &str,
        filter: &TaskFilter,
    ) -> StoreResult<Vec<Task>> {
        Ok(self
            .lock()?
            .tasks
            .values()
            .filter(|t| t.mission_id == mission_id && !t.is_deleted() && filter.matches(t))
            .cloned()
            .collect())
    }
}

impl AssignmentStore for MemoryStore {
    fn insert_assignment(&self, assignment: &Assignment) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let key = (
            assignment.task_id.clone(),
            assignment.responder_id.clone(),
        );
        if tables.assignments.contains_key(&key) {
            return Err(StoreError::DuplicateAssignment {
                task_id: key.0,
                responder_id: key.1,
            });
        }
        tables.assignments.insert(key, assignment.clone());
        Ok(())
    }

    fn find_by_task_and_responder(
        &self,
        task_id: &str,
        responder_id: &str,
    ) -> StoreResult<Option<Assignment>> {
        Ok(self
            .lock()?
            .assignments
            .get(&(task_id.to_string(), responder_id.to_string()))
            .cloned())
    }

    fn find_by_task(&self, task_id: &str) -> StoreResult<Vec<Assignment>> {
        let mut found: Vec<Assignment> = self
            .lock()?
            .assignments
            .values()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn find_by_responder(
        &self,
        responder_id: &str,
        statuses: &[AssignmentStatus],
    ) -> StoreResult<Vec<Assignment>> {
        let mut found: Vec<Assignment> = self
            .lock()?
            .assignments
            .values()
            .filter(|a| a.responder_id == responder_id && statuses.contains(&a.status))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn update_assignment(&self, assignment: &Assignment) -> StoreResult<Assignment> {
        let mut tables = self.lock()?;
        let key = (
            assignment.task_id.clone(),
            assignment.responder_id.clone(),
        );
        let stored = tables
            .assignments
            .get_mut(&key)
            .ok_or_else(|| StoreError::Missing {
                entity: "assignment",
                id: assignment.id.clone(),
            })?;

        if stored.version != assignment.version {
            return Err(StoreError::VersionConflict {
                entity: "assignment",
                id: assignment.id.clone(),
                expected: assignment.version,
            });
        }

        let mut next = assignment.clone();
        next.version += 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task(id: &str, mission: &str) -> Task {
        Task::new(
            id.to_string(),
            mission.to_string(),
            "Sandbagging".to_string(),
            "cmdr".to_string(),
            Utc::now(),
        )
    }

    fn assignment(task_id: &str, responder: &str) -> Assignment {
        Assignment::new(
            format!("a-{}", responder),
            task_id.to_string(),
            responder.to_string(),
            "Name".to_string(),
            "cmdr".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn test_task_version_cas() {
        let store = MemoryStore::new();
        let original = task("t-1", "m-1");
        store.insert_task(&original).unwrap();

        let updated = store.update_task(&original).unwrap();
        assert_eq!(updated.version, 1);

        // Stale copy is rejected
        let stale = store.update_task(&original);
        assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));
    }

    #[test]
    fn test_update_missing_task() {
        let store = MemoryStore::new();
        let result = store.update_task(&task("ghost", "m-1"));
        assert!(matches!(result, Err(StoreError::Missing { .. })));
    }

    #[test]
    fn test_mission_query_skips_deleted() {
        let store = MemoryStore::new();
        store.insert_task(&task("t-1", "m-1")).unwrap();
        let mut deleted = task("t-2", "m-1");
        deleted.deleted_at = Some(Utc::now());
        store.insert_task(&deleted).unwrap();
        store.insert_task(&task("t-3", "m-2")).unwrap();

        let found = store
            .find_by_mission_and_status("m-1", &TaskFilter::default())
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t-1");
    }

    #[test]
    fn test_duplicate_assignment_rejected() {
        let store = MemoryStore::new();
        store.insert_assignment(&assignment("t-1", "v-1")).unwrap();
        let again = store.insert_assignment(&assignment("t-1", "v-1"));
        assert!(matches!(again, Err(StoreError::DuplicateAssignment { .. })));
        assert_eq!(store.find_by_task("t-1").unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_responder_filters_status() {
        let store = MemoryStore::new();
        store.insert_assignment(&assignment("t-1", "v-1")).unwrap();
        let mut declined = assignment("t-2", "v-1");
        declined.status = AssignmentStatus::Declined;
        store.insert_assignment(&declined).unwrap();

        let live = store
            .find_by_responder("v-1", &[AssignmentStatus::Pending, AssignmentStatus::Accepted])
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].task_id, "t-1");
    }
}
