use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::Json,
};
use beacon_core::GeoCoordinate;
use beacon_dispatch::{
    events::TaskChanged, Assignment, CheckInInput, CheckInResult, CheckOutInput, CheckOutResult,
    CreateTaskInput, DispatchEngine, DispatchEvent, DispatchResult, EventBus, GeofenceEvent,
    GeofenceZone, MissionStats, Task, TaskDetail, TaskFilter, TaskPriority, TaskStatus,
    UpdateTaskInput,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the caller's responder id
pub const CALLER_HEADER: &str = "x-user-id";

/// Identity of the caller, taken from the `x-user-id` header
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CallerId(value.to_string()))
            .ok_or(ApiError::MissingCaller)
    }
}

/// Run a synchronous engine call off the async runtime
async fn run_engine<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&DispatchEngine) -> DispatchResult<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    Ok(tokio::task::spawn_blocking(move || op(&engine)).await??)
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> Result<TaskFilter, ApiError> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(
                TaskStatus::parse(raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {}", raw)))?,
            ),
            None => None,
        };
        let priority = match self.priority.as_deref() {
            Some(raw) => Some(
                TaskPriority::parse(raw)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown priority: {}", raw)))?,
            ),
            None => None,
        };
        Ok(TaskFilter { status, priority })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub volunteer_ids: Vec<String>,
    /// Display names known to the caller, keyed by responder id
    #[serde(default)]
    pub names: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoteRequest {
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReport {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub volunteer_name: Option<String>,
}

// ==================== Missions ====================

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(mission_id): Path<String>,
    Json(mut input): Json<CreateTaskInput>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    input.mission_id = mission_id;
    let task = run_engine(&state, move |engine| engine.create_task(input, &caller)).await?;

    state.bus.publish(DispatchEvent::Created(TaskChanged { task: task.clone() }));
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TaskDetail>>, ApiError> {
    let filter = query.into_filter()?;
    let tasks = run_engine(&state, move |engine| {
        engine.get_tasks_by_mission(&mission_id, filter)
    })
    .await?;
    Ok(Json(tasks))
}

pub async fn mission_stats(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
) -> Result<Json<MissionStats>, ApiError> {
    let stats = run_engine(&state, move |engine| engine.get_mission_stats(&mission_id)).await?;
    Ok(Json(stats))
}

pub async fn list_zones(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
) -> Json<Vec<GeofenceZone>> {
    let zones = state
        .engine
        .geofences()
        .map(|registry| registry.zones(&mission_id))
        .unwrap_or_default();
    Json(zones)
}

pub async fn put_zone(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
    Json(mut zone): Json<GeofenceZone>,
) -> Result<Json<GeofenceZone>, ApiError> {
    let registry = state
        .engine
        .geofences()
        .ok_or_else(|| ApiError::Internal("geofencing is disabled".to_string()))?;
    if zone.vertices.len() < 3 {
        return Err(ApiError::BadRequest(
            "a zone needs at least three vertices".to_string(),
        ));
    }

    zone.mission_id = mission_id;
    registry.register_zone(zone.clone());
    Ok(Json(zone))
}

pub async fn delete_zone(
    State(state): State<Arc<AppState>>,
    Path((mission_id, zone_id)): Path<(String, String)>,
) -> StatusCode {
    let removed = state
        .engine
        .geofences()
        .is_some_and(|registry| registry.remove_zone(&mission_id, &zone_id));
    if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

pub async fn report_location(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(mission_id): Path<String>,
    Json(report): Json<LocationReport>,
) -> Result<Json<Vec<GeofenceEvent>>, ApiError> {
    let position = GeoCoordinate::new(report.latitude, report.longitude)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let name = report.volunteer_name.unwrap_or_else(|| caller.clone());

    let crossings = state
        .engine
        .report_location(&mission_id, &caller, &name, position);
    Ok(Json(crossings))
}

// ==================== Tasks ====================

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskDetail>, ApiError> {
    let detail = run_engine(&state, move |engine| engine.get_task_by_id(&task_id)).await?;
    Ok(Json(detail))
}

pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    Json(input): Json<UpdateTaskInput>,
) -> Result<Json<Task>, ApiError> {
    let task = run_engine(&state, move |engine| engine.update_task(&task_id, input)).await?;
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = run_engine(&state, move |engine| engine.delete_task(&task_id)).await?;
    Ok(Json(task))
}

pub async fn assign_task(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<Vec<Assignment>>, ApiError> {
    let created = run_engine(&state, move |engine| {
        engine.assign_task(&task_id, &request.volunteer_ids, &caller, &request.names)
    })
    .await?;
    info!(created = created.len(), "Assignments created");
    Ok(Json(created))
}

pub async fn accept_assignment(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
    body: Option<Json<NoteRequest>>,
) -> Result<Json<Assignment>, ApiError> {
    let note = body.and_then(|Json(b)| b.note);
    let assignment = run_engine(&state, move |engine| {
        engine.accept_assignment(&task_id, &caller, note)
    })
    .await?;
    Ok(Json(assignment))
}

pub async fn decline_assignment(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<Assignment>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let assignment = run_engine(&state, move |engine| {
        engine.decline_assignment(&task_id, &caller, reason)
    })
    .await?;
    Ok(Json(assignment))
}

pub async fn start_task(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task = run_engine(&state, move |engine| engine.start_task(&task_id, &caller)).await?;
    Ok(Json(task))
}

pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
    body: Option<Json<NotesRequest>>,
) -> Result<Json<Task>, ApiError> {
    let notes = body.and_then(|Json(b)| b.notes);
    let task = run_engine(&state, move |engine| {
        engine.complete_task(&task_id, &caller, notes)
    })
    .await?;
    Ok(Json(task))
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<Task>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let task = run_engine(&state, move |engine| engine.cancel_task(&task_id, reason)).await?;
    Ok(Json(task))
}

pub async fn check_in(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
    Json(input): Json<CheckInInput>,
) -> Result<Json<CheckInResult>, ApiError> {
    let result = run_engine(&state, move |engine| {
        engine.check_in(&task_id, &caller, input)
    })
    .await?;
    Ok(Json(result))
}

pub async fn check_out(
    State(state): State<Arc<AppState>>,
    CallerId(caller): CallerId,
    Path(task_id): Path<String>,
    body: Option<Json<CheckOutInput>>,
) -> Result<Json<CheckOutResult>, ApiError> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let result = run_engine(&state, move |engine| {
        engine.check_out(&task_id, &caller, input)
    })
    .await?;
    Ok(Json(result))
}

// ==================== Volunteers ====================

pub async fn volunteer_tasks(
    State(state): State<Arc<AppState>>,
    Path(volunteer_id): Path<String>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = run_engine(&state, move |engine| {
        engine.get_volunteer_tasks(&volunteer_id)
    })
    .await?;
    Ok(Json(tasks))
}
