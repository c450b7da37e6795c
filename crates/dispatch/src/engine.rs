//! Dispatch engine
//!
//! Owns every legal task and assignment transition. Each operation validates
//! against the freshly loaded record, writes through a version-checked store
//! update (reloading and re-validating on conflict), and publishes exactly one
//! domain event on success.

use beacon_core::{
    distance_meters, elapsed_minutes, Clock, DispatchConfig, GeoCoordinate, SystemClock,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assignment::{Assignment, AssignmentStatus, AttendanceRecord};
use crate::directory::ResponderDirectory;
use crate::error::{DispatchError, DispatchResult, StoreError};
use crate::events::{
    AssignmentResponsePayload, CheckedInPayload, CheckedOutPayload, DispatchEvent, EventBus,
    GeofenceTriggeredPayload, TaskAssignedPayload, TaskCancelledPayload, TaskChanged,
    TaskLifecyclePayload,
};
use crate::geofence::{GeofenceEvent, GeofenceRegistry};
use crate::input::{
    CheckInInput, CheckInResult, CheckOutInput, CheckOutResult, CreateTaskInput, MissionStats,
    TaskDetail, TaskFilter, UpdateTaskInput,
};
use crate::store::{AssignmentStore, TaskStore};
use crate::task::{Task, TaskPriority, TaskStatus};

/// Metadata key holding the cancellation reason
pub const META_CANCEL_REASON: &str = "cancelReason";
/// Metadata key holding completion notes
pub const META_COMPLETION_NOTES: &str = "completionNotes";
/// Metadata key holding who started the task
pub const META_STARTED_BY: &str = "startedBy";

const LIVE_ASSIGNMENT: [AssignmentStatus; 2] =
    [AssignmentStatus::Pending, AssignmentStatus::Accepted];

/// Parse an RFC 3339 / ISO 8601 deadline; naive values are taken as UTC
fn parse_due_at(value: Option<&str>) -> DispatchResult<Option<DateTime<Utc>>> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(parsed.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Some(naive.and_utc()));
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Some(midnight.and_utc()));
    }

    Err(DispatchError::precondition(format!("invalid due date: {}", raw)))
}

fn validate_location(location: Option<GeoCoordinate>) -> DispatchResult<Option<GeoCoordinate>> {
    location
        .map(|loc| GeoCoordinate::new(loc.latitude, loc.longitude))
        .transpose()
        .map_err(|e| DispatchError::precondition(e.to_string()))
}

fn by_urgency(a: &Task, b: &Task) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

fn check_in_message(distance: Option<u32>, within_range: bool, radius: f64) -> String {
    match distance {
        None => "簽到成功".to_string(),
        Some(d) if within_range => format!("簽到成功，距離任務地點 {} 公尺", d),
        Some(d) => format!("已簽到，但距離任務地點 {} 公尺，超出 {} 公尺範圍", d, radius),
    }
}

/// Task dispatch engine
pub struct DispatchEngine {
    tasks: Arc<dyn TaskStore>,
    assignments: Arc<dyn AssignmentStore>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    geofences: Option<Arc<GeofenceRegistry>>,
    config: DispatchConfig,
}

impl DispatchEngine {
    /// Create an engine over separate task and assignment stores
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        assignments: Arc<dyn AssignmentStore>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            tasks,
            assignments,
            bus,
            clock: Arc::new(SystemClock),
            geofences: None,
            config: DispatchConfig::default(),
        }
    }

    /// Create an engine over one store implementing both traits
    pub fn with_store<S>(store: Arc<S>, bus: Arc<dyn EventBus>) -> Self
    where
        S: TaskStore + AssignmentStore + 'static,
    {
        let tasks: Arc<dyn TaskStore> = store.clone();
        let assignments: Arc<dyn AssignmentStore> = store;
        Self::new(tasks, assignments, bus)
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the dispatch policy
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Evaluate check-in positions against mission geofences
    pub fn with_geofences(mut self, registry: Arc<GeofenceRegistry>) -> Self {
        self.geofences = Some(registry);
        self
    }

    /// Active dispatch policy
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Attached geofence registry, if any
    pub fn geofences(&self) -> Option<&Arc<GeofenceRegistry>> {
        self.geofences.as_ref()
    }

    // ==================== Record access ====================

    fn load_task(&self, task_id: &str) -> DispatchResult<Task> {
        match self.tasks.get_task(task_id)? {
            Some(task) if !task.is_deleted() => Ok(task),
            _ => Err(DispatchError::task_not_found(task_id)),
        }
    }

    fn load_assignment(&self, task_id: &str, responder_id: &str) -> DispatchResult<Assignment> {
        self.assignments
            .find_by_task_and_responder(task_id, responder_id)?
            .ok_or_else(|| DispatchError::assignment_not_found(task_id, responder_id))
    }

    /// Load, mutate and store a task, retrying on version conflicts.
    ///
    /// `apply` returns `Ok(false)` when no write is needed; the loaded task is
    /// then returned unchanged.
    fn update_task_with<F>(&self, task_id: &str, mut apply: F) -> DispatchResult<Task>
    where
        F: FnMut(&mut Task) -> DispatchResult<bool>,
    {
        for attempt in 0..self.config.max_update_retries {
            let current = self.load_task(task_id)?;
            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok(current);
            }

            match self.tasks.update_task(&next) {
                Ok(saved) => return Ok(saved),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(task_id, attempt, "Task changed concurrently, retrying");
                }
                Err(StoreError::Missing { .. }) => {
                    return Err(DispatchError::task_not_found(task_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(task_id, "Task update retries exhausted");
        Err(DispatchError::Conflict(format!(
            "task {} kept changing during update",
            task_id
        )))
    }

    /// Assignment counterpart of [`Self::update_task_with`]
    fn update_assignment_with<F>(
        &self,
        task_id: &str,
        responder_id: &str,
        mut apply: F,
    ) -> DispatchResult<Assignment>
    where
        F: FnMut(&mut Assignment) -> DispatchResult<bool>,
    {
        for attempt in 0..self.config.max_update_retries {
            let current = self.load_assignment(task_id, responder_id)?;
            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok(current);
            }

            match self.assignments.update_assignment(&next) {
                Ok(saved) => return Ok(saved),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(task_id, responder_id, attempt, "Assignment changed concurrently, retrying");
                }
                Err(StoreError::Missing { .. }) => {
                    return Err(DispatchError::assignment_not_found(task_id, responder_id));
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(task_id, responder_id, "Assignment update retries exhausted");
        Err(DispatchError::Conflict(format!(
            "assignment {}/{} kept changing during update",
            task_id, responder_id
        )))
    }

    fn lifecycle_payload(task: &Task, triggered_by: &str, at: DateTime<Utc>) -> TaskLifecyclePayload {
        TaskLifecyclePayload {
            task_id: task.id.clone(),
            mission_id: task.mission_id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            triggered_by: triggered_by.to_string(),
            timestamp: at,
        }
    }

    // ==================== Task authoring ====================

    /// Create a draft task. No event is published.
    pub fn create_task(&self, input: CreateTaskInput, creator_id: &str) -> DispatchResult<Task> {
        if input.mission_id.trim().is_empty() {
            return Err(DispatchError::precondition("mission id is required"));
        }
        if input.title.trim().is_empty() {
            return Err(DispatchError::precondition("title is required"));
        }
        let location = validate_location(input.location)?;
        let due_at = parse_due_at(input.due_at.as_deref())?;

        let now = self.clock.now();
        let mut task = Task::new(
            Uuid::new_v4().to_string(),
            input.mission_id,
            input.title,
            creator_id.to_string(),
            now,
        );
        task.description = input.description;
        task.category = input.category.unwrap_or_default();
        task.priority = input.priority.unwrap_or_default();
        task.location = location;
        task.location_description = input.location_description;
        task.required_skills = input.required_skills;
        task.required_resources = input.required_resources;
        task.due_at = due_at;
        task.estimated_duration_minutes = input.estimated_duration_minutes;
        task.metadata = input.metadata;

        self.tasks.insert_task(&task)?;

        info!(
            task_id = %task.id,
            mission_id = %task.mission_id,
            priority = task.priority.as_str(),
            created_by = creator_id,
            "Task created"
        );
        Ok(task)
    }

    /// Patch descriptive and scheduling fields; status is never touched
    pub fn update_task(&self, task_id: &str, input: UpdateTaskInput) -> DispatchResult<Task> {
        let location = validate_location(input.location)?;
        let due_at = parse_due_at(input.due_at.as_deref())?;
        if input.is_empty() {
            return self.load_task(task_id);
        }

        let now = self.clock.now();
        let task = self.update_task_with(task_id, |task| {
            if let Some(title) = &input.title {
                if title.trim().is_empty() {
                    return Err(DispatchError::precondition("title is required"));
                }
                task.title = title.clone();
            }
            if let Some(description) = &input.description {
                task.description = description.clone();
            }
            if let Some(category) = input.category {
                task.category = category;
            }
            if let Some(priority) = input.priority {
                task.priority = priority;
            }
            if location.is_some() {
                task.location = location;
            }
            if let Some(hint) = &input.location_description {
                task.location_description = Some(hint.clone());
            }
            if let Some(skills) = &input.required_skills {
                task.required_skills = skills.clone();
            }
            if let Some(resources) = &input.required_resources {
                task.required_resources = resources.clone();
            }
            if due_at.is_some() {
                task.due_at = due_at;
            }
            if let Some(minutes) = input.estimated_duration_minutes {
                task.estimated_duration_minutes = Some(minutes);
            }
            task.updated_at = now;
            Ok(true)
        })?;

        info!(task_id, "Task updated");
        self.bus.publish(DispatchEvent::Updated(TaskChanged { task: task.clone() }));
        Ok(task)
    }

    /// Soft-delete a task; it disappears from every query and mutation
    pub fn delete_task(&self, task_id: &str) -> DispatchResult<Task> {
        let now = self.clock.now();
        let task = self.update_task_with(task_id, |task| {
            task.deleted_at = Some(now);
            task.updated_at = now;
            Ok(true)
        })?;

        info!(task_id, "Task deleted");
        self.bus.publish(DispatchEvent::Updated(TaskChanged { task: task.clone() }));
        Ok(task)
    }

    // ==================== Assignment ====================

    /// Assign responders to a task.
    ///
    /// Responders who already hold an assignment for the task are skipped.
    /// Returns only the assignments created by this call.
    pub fn assign_task(
        &self,
        task_id: &str,
        responder_ids: &[String],
        assigned_by: &str,
        directory: &dyn ResponderDirectory,
    ) -> DispatchResult<Vec<Assignment>> {
        let task = self.load_task(task_id)?;
        if task.is_terminal() {
            return Err(DispatchError::precondition(
                "cannot assign completed or cancelled tasks",
            ));
        }

        let now = self.clock.now();
        let mut seen = HashSet::new();
        let mut created = Vec::new();

        for responder_id in responder_ids {
            if !seen.insert(responder_id.as_str()) {
                continue;
            }
            if self
                .assignments
                .find_by_task_and_responder(task_id, responder_id)?
                .is_some()
            {
                debug!(task_id, responder_id = %responder_id, "Responder already assigned");
                continue;
            }

            let assignment = Assignment::new(
                Uuid::new_v4().to_string(),
                task_id.to_string(),
                responder_id.clone(),
                directory.name_or_unknown(responder_id),
                assigned_by.to_string(),
                now,
            );
            match self.assignments.insert_assignment(&assignment) {
                Ok(()) => created.push(assignment),
                Err(StoreError::DuplicateAssignment { .. }) => {
                    debug!(task_id, responder_id = %responder_id, "Concurrent duplicate assignment skipped");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if created.is_empty() {
            return Ok(created);
        }

        // The task may have been cancelled while the rows were inserted; a
        // cascade that ran before the inserts would have missed them.
        let outcome = self.update_task_with(task_id, |task| {
            if task.is_terminal() {
                return Err(DispatchError::precondition(
                    "cannot assign completed or cancelled tasks",
                ));
            }
            if task.status != TaskStatus::Draft {
                return Ok(false);
            }
            task.transition(TaskStatus::Pending, Some(assigned_by), now)?;
            Ok(true)
        });
        let task = match outcome {
            Ok(task) => task,
            Err(e) => {
                self.withdraw_assignments(task_id, &created);
                return Err(e);
            }
        };

        info!(
            task_id,
            assigned = created.len(),
            assigned_by,
            "Responders assigned"
        );

        self.bus.publish(DispatchEvent::Assigned(TaskAssignedPayload {
            task_id: task.id.clone(),
            mission_id: task.mission_id.clone(),
            title: task.title.clone(),
            priority: task.priority,
            volunteer_ids: created.iter().map(|a| a.responder_id.clone()).collect(),
            volunteer_names: created.iter().map(|a| a.responder_name.clone()).collect(),
            triggered_by: assigned_by.to_string(),
            timestamp: now,
        }));

        Ok(created)
    }

    /// Cancel assignments created by an assignment call that lost its task
    fn withdraw_assignments(&self, task_id: &str, created: &[Assignment]) {
        for assignment in created {
            let withdrawn =
                self.update_assignment_with(task_id, &assignment.responder_id, |assignment| {
                    if !assignment.status.is_live() {
                        return Ok(false);
                    }
                    assignment.status = AssignmentStatus::Cancelled;
                    Ok(true)
                });
            if let Err(e) = withdrawn {
                warn!(
                    task_id,
                    responder_id = %assignment.responder_id,
                    error = %e,
                    "Failed to withdraw assignment"
                );
            }
        }
    }

    /// Responder accepts a pending assignment
    pub fn accept_assignment(
        &self,
        task_id: &str,
        responder_id: &str,
        note: Option<String>,
    ) -> DispatchResult<Assignment> {
        let task = self.load_task(task_id)?;
        if task.is_terminal() {
            return Err(DispatchError::precondition("task is no longer open"));
        }

        let now = self.clock.now();
        let assignment = self.update_assignment_with(task_id, responder_id, |assignment| {
            if assignment.status != AssignmentStatus::Pending {
                return Err(DispatchError::precondition("assignment not pending"));
            }
            assignment.status = AssignmentStatus::Accepted;
            assignment.responded_at = Some(now);
            assignment.accept_note = note.clone();
            Ok(true)
        })?;

        let task = self.update_task_with(task_id, |task| match task.status {
            TaskStatus::Draft => {
                task.transition(TaskStatus::Pending, Some(responder_id), now)?;
                task.transition(TaskStatus::Accepted, Some(responder_id), now)?;
                Ok(true)
            }
            TaskStatus::Pending | TaskStatus::Assigned => {
                task.transition(TaskStatus::Accepted, Some(responder_id), now)?;
                Ok(true)
            }
            // Closed after the assignment write; a cancel cascade picks up the row
            status if status.is_terminal() => {
                Err(DispatchError::precondition("task is no longer open"))
            }
            _ => Ok(false),
        })?;

        info!(task_id, responder_id, task_status = task.status.as_str(), "Assignment accepted");

        self.bus
            .publish(DispatchEvent::AssignmentResponse(AssignmentResponsePayload {
                task_id: task.id.clone(),
                mission_id: task.mission_id.clone(),
                volunteer_id: responder_id.to_string(),
                volunteer_name: assignment.responder_name.clone(),
                accepted: true,
                reason: None,
                timestamp: now,
            }));

        Ok(assignment)
    }

    /// Responder declines a pending assignment; the task status is untouched
    pub fn decline_assignment(
        &self,
        task_id: &str,
        responder_id: &str,
        reason: Option<String>,
    ) -> DispatchResult<Assignment> {
        let task = self.load_task(task_id)?;

        let now = self.clock.now();
        let assignment = self.update_assignment_with(task_id, responder_id, |assignment| {
            if assignment.status != AssignmentStatus::Pending {
                return Err(DispatchError::precondition("assignment not pending"));
            }
            assignment.status = AssignmentStatus::Declined;
            assignment.responded_at = Some(now);
            assignment.decline_reason = reason.clone();
            Ok(true)
        })?;

        info!(task_id, responder_id, "Assignment declined");

        self.bus
            .publish(DispatchEvent::AssignmentResponse(AssignmentResponsePayload {
                task_id: task.id.clone(),
                mission_id: task.mission_id.clone(),
                volunteer_id: responder_id.to_string(),
                volunteer_name: assignment.responder_name.clone(),
                accepted: false,
                reason,
                timestamp: now,
            }));

        Ok(assignment)
    }

    // ==================== Operator lifecycle ====================

    /// Start work on an accepted task
    pub fn start_task(&self, task_id: &str, actor_id: &str) -> DispatchResult<Task> {
        let now = self.clock.now();
        let task = self.update_task_with(task_id, |task| {
            if task.status != TaskStatus::Accepted {
                return Err(DispatchError::precondition(
                    "task must be accepted before starting",
                ));
            }
            task.transition(TaskStatus::InProgress, Some(actor_id), now)?;
            task.set_metadata(META_STARTED_BY, actor_id);
            Ok(true)
        })?;

        info!(task_id, actor_id, "Task started");
        self.bus
            .publish(DispatchEvent::Started(Self::lifecycle_payload(&task, actor_id, now)));
        Ok(task)
    }

    /// Complete an in-progress task, closing the caller's accepted assignment
    pub fn complete_task(
        &self,
        task_id: &str,
        responder_id: &str,
        notes: Option<String>,
    ) -> DispatchResult<Task> {
        let now = self.clock.now();
        let task = self.update_task_with(task_id, |task| {
            if task.status != TaskStatus::InProgress {
                return Err(DispatchError::precondition(
                    "task must be in progress to complete",
                ));
            }
            task.transition(TaskStatus::Completed, Some(responder_id), now)?;
            if let Some(notes) = &notes {
                task.set_metadata(META_COMPLETION_NOTES, notes.clone());
            }
            Ok(true)
        })?;

        let holds_assignment = self
            .assignments
            .find_by_task_and_responder(task_id, responder_id)?
            .is_some();
        if holds_assignment {
            self.update_assignment_with(task_id, responder_id, |assignment| {
                if assignment.status != AssignmentStatus::Accepted {
                    return Ok(false);
                }
                assignment.status = AssignmentStatus::Completed;
                assignment.completed_at = Some(now);
                assignment.completion_notes = notes.clone();
                Ok(true)
            })?;
        }

        info!(task_id, responder_id, "Task completed");
        self.bus.publish(DispatchEvent::Completed(Self::lifecycle_payload(
            &task,
            responder_id,
            now,
        )));
        Ok(task)
    }

    /// Cancel a task and every pending or accepted assignment
    pub fn cancel_task(&self, task_id: &str, reason: Option<String>) -> DispatchResult<Task> {
        let now = self.clock.now();
        let task = self.update_task_with(task_id, |task| {
            match task.status {
                TaskStatus::Completed => {
                    return Err(DispatchError::precondition("cannot cancel completed tasks"))
                }
                TaskStatus::Cancelled => {
                    return Err(DispatchError::precondition("task already cancelled"))
                }
                _ => {}
            }
            task.transition(TaskStatus::Cancelled, None, now)?;
            if let Some(reason) = &reason {
                task.set_metadata(META_CANCEL_REASON, reason.clone());
            }
            Ok(true)
        })?;

        let mut cascaded = 0usize;
        for assignment in self.assignments.find_by_task(task_id)? {
            if !assignment.status.is_live() {
                continue;
            }
            let updated =
                self.update_assignment_with(task_id, &assignment.responder_id, |assignment| {
                    if !assignment.status.is_live() {
                        return Ok(false);
                    }
                    assignment.status = AssignmentStatus::Cancelled;
                    Ok(true)
                })?;
            if updated.status == AssignmentStatus::Cancelled {
                cascaded += 1;
            }
        }

        info!(task_id, cancelled_assignments = cascaded, "Task cancelled");
        self.bus.publish(DispatchEvent::Cancelled(TaskCancelledPayload {
            task_id: task.id.clone(),
            mission_id: task.mission_id.clone(),
        }));
        Ok(task)
    }

    // ==================== Attendance ====================

    /// Record a GPS check-in. Being out of range is reported, never rejected.
    pub fn check_in(
        &self,
        task_id: &str,
        responder_id: &str,
        input: CheckInInput,
    ) -> DispatchResult<CheckInResult> {
        let task = self.load_task(task_id)?;
        let position = GeoCoordinate::new(input.latitude, input.longitude)
            .map_err(|e| DispatchError::precondition(e.to_string()))?;

        let radius = self.config.check_in_radius_meters;
        let distance = task.location.map(|site| {
            distance_meters(
                position.latitude,
                position.longitude,
                site.latitude,
                site.longitude,
            ) as u32
        });
        let within_range = distance.map_or(true, |d| f64::from(d) < radius);

        let now = self.clock.now();
        let assignment = self.update_assignment_with(task_id, responder_id, |assignment| {
            if assignment.status != AssignmentStatus::Accepted {
                return Err(DispatchError::precondition(
                    "assignment must be accepted before check-in",
                ));
            }
            assignment.attendance = Some(AttendanceRecord {
                check_in_at: now,
                check_in_location: position,
                distance_meters: distance,
                is_within_range: within_range,
                check_in_note: input.note.clone(),
                check_out_at: None,
                check_out_location: None,
                duration_minutes: None,
                check_out_notes: None,
            });
            Ok(true)
        })?;

        if within_range {
            info!(task_id, responder_id, distance_m = ?distance, "Responder checked in");
        } else {
            warn!(task_id, responder_id, distance_m = ?distance, radius_m = radius, "Responder checked in out of range");
        }

        self.bus.publish(DispatchEvent::CheckedIn(CheckedInPayload {
            task_id: task.id.clone(),
            volunteer_id: responder_id.to_string(),
            mission_id: task.mission_id.clone(),
            location: position,
            distance_meters: distance,
            is_within_range: within_range,
            timestamp: now,
        }));

        self.report_location(
            &task.mission_id,
            responder_id,
            &assignment.responder_name,
            position,
        );

        Ok(CheckInResult {
            success: true,
            message: check_in_message(distance, within_range, radius),
            assignment,
            distance_meters: distance,
            is_within_range: within_range,
        })
    }

    /// Record a check-out and complete the responder's assignment
    pub fn check_out(
        &self,
        task_id: &str,
        responder_id: &str,
        input: CheckOutInput,
    ) -> DispatchResult<CheckOutResult> {
        let task = self.load_task(task_id)?;
        let position = match (input.latitude, input.longitude) {
            (Some(lat), Some(lng)) => Some(
                GeoCoordinate::new(lat, lng)
                    .map_err(|e| DispatchError::precondition(e.to_string()))?,
            ),
            (None, None) => None,
            _ => {
                return Err(DispatchError::precondition(
                    "check-out location needs both latitude and longitude",
                ))
            }
        };

        let now = self.clock.now();
        let assignment = self.update_assignment_with(task_id, responder_id, |assignment| {
            let status = assignment.status;
            let Some(attendance) = assignment.attendance.as_mut() else {
                return Err(DispatchError::precondition("must check-in before check-out"));
            };
            if attendance.is_checked_out() {
                return Err(DispatchError::precondition("already checked out"));
            }
            if !matches!(status, AssignmentStatus::Accepted | AssignmentStatus::Completed) {
                return Err(DispatchError::precondition(format!(
                    "cannot check out of a {} assignment",
                    status.as_str()
                )));
            }

            attendance.check_out_at = Some(now);
            attendance.check_out_location = position;
            attendance.duration_minutes = Some(elapsed_minutes(attendance.check_in_at, now));
            attendance.check_out_notes = input.notes.clone();

            if status == AssignmentStatus::Accepted {
                assignment.status = AssignmentStatus::Completed;
                assignment.completed_at = Some(now);
            }
            Ok(true)
        })?;

        let duration_minutes = assignment
            .attendance
            .as_ref()
            .and_then(|a| a.duration_minutes)
            .unwrap_or(0);

        info!(task_id, responder_id, duration_minutes, "Responder checked out");

        self.bus.publish(DispatchEvent::CheckedOut(CheckedOutPayload {
            task_id: task.id.clone(),
            volunteer_id: responder_id.to_string(),
            mission_id: task.mission_id.clone(),
            duration_minutes,
            timestamp: now,
        }));

        Ok(CheckOutResult {
            success: true,
            assignment,
            duration_minutes,
        })
    }

    /// Evaluate a position report against mission geofences and publish
    /// every resulting crossing. Returns the crossings.
    pub fn report_location(
        &self,
        mission_id: &str,
        responder_id: &str,
        responder_name: &str,
        position: GeoCoordinate,
    ) -> Vec<GeofenceEvent> {
        let Some(registry) = &self.geofences else {
            return Vec::new();
        };

        let crossings = registry.check_location(
            responder_id,
            responder_name,
            position,
            mission_id,
            self.clock.now(),
        );

        crossings
            .into_iter()
            .map(|(event, notification)| {
                info!(
                    mission_id,
                    responder_id,
                    zone_id = %event.zone_id,
                    kind = ?event.kind,
                    "Geofence triggered"
                );
                self.bus
                    .publish(DispatchEvent::GeofenceTriggered(GeofenceTriggeredPayload {
                        mission_id: mission_id.to_string(),
                        volunteer_id: responder_id.to_string(),
                        event: event.clone(),
                        notification,
                    }));
                event
            })
            .collect()
    }

    // ==================== Queries ====================

    fn detail(&self, task: Task) -> DispatchResult<TaskDetail> {
        let assignments = self.assignments.find_by_task(&task.id)?;
        Ok(TaskDetail { task, assignments })
    }

    /// Mission tasks with their assignments, most urgent and newest first
    pub fn get_tasks_by_mission(
        &self,
        mission_id: &str,
        filter: TaskFilter,
    ) -> DispatchResult<Vec<TaskDetail>> {
        let mut tasks = self.tasks.find_by_mission_and_status(mission_id, &filter)?;
        tasks.sort_by(by_urgency);
        tasks.into_iter().map(|task| self.detail(task)).collect()
    }

    /// One task with its assignments
    pub fn get_task_by_id(&self, task_id: &str) -> DispatchResult<TaskDetail> {
        let task = self.load_task(task_id)?;
        self.detail(task)
    }

    /// Tasks the responder holds a pending or accepted assignment for
    pub fn get_volunteer_tasks(&self, responder_id: &str) -> DispatchResult<Vec<Task>> {
        let mut tasks = Vec::new();
        for assignment in self
            .assignments
            .find_by_responder(responder_id, &LIVE_ASSIGNMENT)?
        {
            match self.tasks.get_task(&assignment.task_id)? {
                Some(task) if !task.is_deleted() => tasks.push(task),
                _ => {}
            }
        }
        tasks.sort_by(by_urgency);
        Ok(tasks)
    }

    /// Per-mission counts by status and priority
    pub fn get_mission_stats(&self, mission_id: &str) -> DispatchResult<MissionStats> {
        let mut stats = MissionStats::empty(mission_id);
        for task in self
            .tasks
            .find_by_mission_and_status(mission_id, &TaskFilter::default())?
        {
            stats.record(&task);
        }
        Ok(stats)
    }
}
