//! Dispatch lifecycles against an on-disk SQLite store
//!
//! Each test opens a fresh database file under the system temp directory,
//! drives the engine through a scenario, then reopens the file to check what
//! was durably recorded.

use beacon_dispatch::{
    AssignmentStatus, CheckInInput, DispatchError, SqliteStore, TaskFilter, TaskStatus,
};
use std::path::Path;
use std::sync::Arc;

use crate::test_utils::{roster, temp_db_path, Harness, COMMANDER, MISSION, NEAR_SITE, SITE};

fn reopen(path: &Path) -> Harness {
    Harness::new(Arc::new(SqliteStore::open(path).unwrap()))
}

fn cleanup(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        let _ = std::fs::remove_file(name);
    }
}

#[test]
fn test_full_lifecycle_survives_reopen() {
    let path = temp_db_path();
    let task_id = {
        let harness = reopen(&path);
        let task = harness.located_task("Deliver water to shelter");
        harness.assign_and_accept(&task.id, "vol-chen");
        harness.engine.start_task(&task.id, "vol-chen").unwrap();
        harness
            .engine
            .check_in(
                &task.id,
                "vol-chen",
                CheckInInput {
                    latitude: NEAR_SITE.latitude,
                    longitude: NEAR_SITE.longitude,
                    note: Some("Arrived".to_string()),
                },
            )
            .unwrap();
        harness.clock.advance(chrono::Duration::minutes(10));
        let out = harness
            .engine
            .check_out(&task.id, "vol-chen", Default::default())
            .unwrap();
        assert_eq!(out.duration_minutes, 10);
        harness
            .engine
            .complete_task(&task.id, "vol-chen", Some("200 L delivered".to_string()))
            .unwrap();
        task.id
    };

    let harness = reopen(&path);
    let detail = harness.engine.get_task_by_id(&task_id).unwrap();

    assert_eq!(detail.task.status, TaskStatus::Completed);
    assert!(detail.task.completed_at.is_some());
    assert!(detail.task.has_passed_through(TaskStatus::InProgress));
    assert!(detail.task.verify_transitions());
    assert_eq!(detail.task.location, Some(SITE));

    assert_eq!(detail.assignments.len(), 1);
    let assignment = &detail.assignments[0];
    assert_eq!(assignment.status, AssignmentStatus::Completed);
    assert_eq!(assignment.responder_name, "陳志明");
    let attendance = assignment.attendance.as_ref().unwrap();
    assert_eq!(attendance.duration_minutes, Some(10));
    assert!(attendance.is_within_range);
    assert_eq!(attendance.check_in_note.as_deref(), Some("Arrived"));

    cleanup(&path);
}

#[test]
fn test_duplicate_assignment_is_single_row_on_disk() {
    let path = temp_db_path();
    let harness = reopen(&path);
    let task = harness.located_task("Search block 4");

    let responders = vec!["vol-wang".to_string(), "vol-wang".to_string()];
    let first = harness
        .engine
        .assign_task(&task.id, &responders, COMMANDER, &roster())
        .unwrap();
    let second = harness
        .engine
        .assign_task(&task.id, &responders, COMMANDER, &roster())
        .unwrap();

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    drop(harness);

    let harness = reopen(&path);
    let detail = harness.engine.get_task_by_id(&task.id).unwrap();
    assert_eq!(detail.assignments.len(), 1);
    assert_eq!(detail.task.status, TaskStatus::Pending);

    cleanup(&path);
}

#[test]
fn test_cancel_cascade_persists() {
    let path = temp_db_path();
    let harness = reopen(&path);
    let task = harness.located_task("Check gas leak report");

    harness
        .engine
        .assign_task(
            &task.id,
            &[
                "vol-chen".to_string(),
                "vol-wang".to_string(),
                "vol-lee".to_string(),
            ],
            COMMANDER,
            &roster(),
        )
        .unwrap();
    harness
        .engine
        .accept_assignment(&task.id, "vol-lee", None)
        .unwrap();
    harness
        .engine
        .cancel_task(&task.id, Some("False alarm".to_string()))
        .unwrap();
    drop(harness);

    let harness = reopen(&path);
    let detail = harness.engine.get_task_by_id(&task.id).unwrap();
    assert_eq!(detail.task.status, TaskStatus::Cancelled);
    assert_eq!(detail.assignments.len(), 3);
    assert!(detail
        .assignments
        .iter()
        .all(|a| a.status == AssignmentStatus::Cancelled));
    assert!(harness.engine.get_volunteer_tasks("vol-lee").unwrap().is_empty());

    let err = harness
        .engine
        .accept_assignment(&task.id, "vol-chen", None)
        .unwrap_err();
    assert!(matches!(err, DispatchError::PreconditionFailed(_)));

    cleanup(&path);
}

#[test]
fn test_soft_deleted_task_hidden_from_mission_queries() {
    let path = temp_db_path();
    let harness = reopen(&path);
    let kept = harness.located_task("Staff aid station");
    let removed = harness.located_task("Duplicate entry");

    harness.engine.delete_task(&removed.id).unwrap();

    let listed = harness
        .engine
        .get_tasks_by_mission(MISSION, TaskFilter::default())
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].task.id, kept.id);

    let stats = harness.engine.get_mission_stats(MISSION).unwrap();
    assert_eq!(stats.total, 1);

    cleanup(&path);
}
