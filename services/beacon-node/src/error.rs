use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use beacon_dispatch::DispatchError;
use serde_json::json;
use tracing::error;

/// Failure surfaced by an HTTP handler
#[derive(Debug)]
pub enum ApiError {
    Dispatch(DispatchError),
    MissingCaller,
    BadRequest(String),
    Internal(String),
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::Dispatch(e)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ApiError {
    fn status_and_message(self) -> (StatusCode, String) {
        match self {
            ApiError::Dispatch(DispatchError::NotFound { entity, id }) => {
                (StatusCode::NOT_FOUND, format!("{} not found: {}", entity, id))
            }
            ApiError::Dispatch(DispatchError::PreconditionFailed(msg)) => {
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::Dispatch(DispatchError::Conflict(msg)) => (StatusCode::CONFLICT, msg),
            ApiError::Dispatch(DispatchError::Store(e)) => {
                error!(error = %e, "Store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::MissingCaller => (
                StatusCode::UNAUTHORIZED,
                "missing x-user-id header".to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Handler failure");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}
