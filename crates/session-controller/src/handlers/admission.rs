//! Admission handlers.
//!
//! - `GET /api/v1/admission` - Capacity and queue occupancy
//! - `GET /api/v1/admission/{user_id}/position` - Queue position and wait estimate

use super::parse_user_id;
use crate::actors::CoordinatorStatus;
use crate::errors::ScError;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use common::types::UserId;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response for the position endpoint.
#[derive(Debug, Serialize)]
pub struct QueuePositionResponse {
    pub user_id: UserId,
    /// 1-based, 0 when the user is not queued.
    pub queue_position: usize,
    /// Advisory only.
    pub estimated_wait_minutes: u64,
}

/// Handler for GET /api/v1/admission
#[instrument(skip_all)]
pub async fn admission_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CoordinatorStatus>, ScError> {
    Ok(Json(state.coordinator.status().await?))
}

/// Handler for GET /api/v1/admission/{user_id}/position
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn queue_position(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<QueuePositionResponse>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let queue_position = state.admission.position(user_id.clone()).await?;
    let estimated_wait_minutes = if queue_position == 0 {
        0
    } else {
        state.admission.estimated_wait(queue_position)
    };

    Ok(Json(QueuePositionResponse {
        user_id,
        queue_position,
        estimated_wait_minutes,
    }))
}
