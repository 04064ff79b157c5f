//! Session handlers.
//!
//! - `POST /api/v1/sessions` - Start a session (or join the queue)
//! - `GET /api/v1/sessions/{user_id}` - Session view, polled by the client
//! - `DELETE /api/v1/sessions/{user_id}` - Hang up or leave the queue
//! - `POST /api/v1/sessions/{user_id}/heartbeat` - Presence heartbeat
//! - `POST /api/v1/sessions/{user_id}/feedback` - Rate an ended session

use super::parse_user_id;
use crate::actors::{EndReason, SessionSummary, SessionView, StartSessionRequest};
use crate::errors::ScError;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Request body for `POST /api/v1/sessions/{user_id}/feedback`.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Handler for POST /api/v1/sessions
///
/// # Response
///
/// - 201 Created: session view (`connecting` or `queued` with position and ETA)
/// - 402 Payment Required: no balance
/// - 409 Conflict: a session is already in progress
/// - 503 Service Unavailable: draining
#[instrument(skip_all, fields(user_id = %request.user_id, specialist_ref = %request.specialist_ref))]
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), ScError> {
    let view = state.coordinator.start_session(request).await?;

    info!(
        target: "sc.handlers.sessions",
        user_id = %view.user_id,
        state = ?view.state,
        "Session requested"
    );

    Ok((StatusCode::CREATED, Json(view)))
}

/// Handler for GET /api/v1/sessions/{user_id}
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionView>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let view = state.coordinator.session_view(user_id).await?;
    Ok(Json(view))
}

/// Handler for DELETE /api/v1/sessions/{user_id}
///
/// Idempotent: ending an ended session returns the same summary.
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<SessionSummary>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let summary = state
        .coordinator
        .end_session(user_id, EndReason::Hangup)
        .await?;
    Ok(Json(summary))
}

/// Handler for POST /api/v1/sessions/{user_id}/heartbeat
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ScError> {
    let user_id = parse_user_id(user_id)?;
    state.coordinator.heartbeat(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/v1/sessions/{user_id}/feedback
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<SessionSummary>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let summary = state
        .coordinator
        .submit_feedback(user_id, body.rating, body.comment)
        .await?;
    Ok(Json(summary))
}
