//! HTTP surface for queue operations
//!
//! Thin JSON handlers over [`QueueCoordinator`]. Typed matchmaking errors map
//! to status codes; anything else is a 500.

use crate::amqp::messages::MessageUtils;
use crate::error::{as_matchmaking_error, MatchmakingError};
use crate::queue::QueueCoordinator;
use crate::types::{JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, QueueStatus};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

type ApiState = Arc<QueueCoordinator>;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub identity: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// Error wrapper turning coordinator failures into HTTP responses
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match as_matchmaking_error(&self.0) {
            Some(MatchmakingError::AlreadyQueued { .. }) => (StatusCode::CONFLICT, "already_queued"),
            Some(MatchmakingError::UnknownPlayer { .. }) => (StatusCode::NOT_FOUND, "unknown_player"),
            Some(MatchmakingError::InvalidQueueRequest { .. }) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            Some(MatchmakingError::StoreUnavailable { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            error!("Queue API request failed: {:#}", self.0);
        } else {
            debug!("Queue API request rejected: {}", self.0);
        }

        (
            status,
            Json(json!({
                "error": kind,
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

/// Router for the queue API
pub fn router(coordinator: Arc<QueueCoordinator>) -> Router {
    Router::new()
        .route("/queue/join", post(join_queue))
        .route("/queue/leave", post(leave_queue))
        .route("/queue/status", get(queue_status))
        .route("/queue", delete(clear_queue))
        .with_state(coordinator)
}

async fn join_queue(
    State(coordinator): State<ApiState>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let response = coordinator.join(request).await?;
    Ok(Json(response))
}

async fn leave_queue(
    State(coordinator): State<ApiState>,
    Json(request): Json<LeaveRequest>,
) -> Result<Json<LeaveResponse>, ApiError> {
    MessageUtils::validate_leave_request(&request)?;
    let removed = coordinator.leave(&request.identity).await?;
    Ok(Json(LeaveResponse { removed }))
}

async fn queue_status(
    State(coordinator): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<QueueStatus>, ApiError> {
    let status = coordinator.status(query.identity.as_deref()).await?;
    Ok(Json(status))
}

async fn clear_queue(State(coordinator): State<ApiState>) -> Result<Json<ClearResponse>, ApiError> {
    let cleared = coordinator.clear_queue().await?;
    Ok(Json(ClearResponse { cleared }))
}
