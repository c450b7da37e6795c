use axum::{
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/missions/:mission_id/tasks",
            post(handlers::create_task).get(handlers::list_tasks),
        )
        .route("/missions/:mission_id/stats", get(handlers::mission_stats))
        .route(
            "/missions/:mission_id/zones",
            get(handlers::list_zones).put(handlers::put_zone),
        )
        .route(
            "/missions/:mission_id/zones/:zone_id",
            delete(handlers::delete_zone),
        )
        .route(
            "/missions/:mission_id/locations",
            post(handlers::report_location),
        )
        .route(
            "/tasks/:task_id",
            get(handlers::get_task)
                .patch(handlers::update_task)
                .delete(handlers::delete_task),
        )
        .route("/tasks/:task_id/assign", post(handlers::assign_task))
        .route("/tasks/:task_id/accept", post(handlers::accept_assignment))
        .route("/tasks/:task_id/decline", post(handlers::decline_assignment))
        .route("/tasks/:task_id/start", post(handlers::start_task))
        .route("/tasks/:task_id/complete", post(handlers::complete_task))
        .route("/tasks/:task_id/cancel", post(handlers::cancel_task))
        .route("/tasks/:task_id/check-in", post(handlers::check_in))
        .route("/tasks/:task_id/check-out", post(handlers::check_out))
        .route(
            "/volunteers/:volunteer_id/tasks",
            get(handlers::volunteer_tasks),
        )
        .with_state(state)
        .layer(ServiceBuilder::new().into_inner())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "beacon-node",
        "timestamp": Utc::now().to_rfc3339()
    }))
}
