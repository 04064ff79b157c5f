//! Ledger handlers.
//!
//! - `POST /api/v1/ledger/{user_id}/top-up` - Add minutes
//! - `GET /api/v1/ledger/{user_id}/balance` - Current balance
//! - `GET /api/v1/ledger/{user_id}/transactions` - History, newest first
//!
//! Payment capture happens upstream; a top-up here records minutes the web
//! app already charged for.

use super::parse_user_id;
use crate::errors::ScError;
use crate::ledger::Transaction;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use common::types::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Request body for a top-up.
#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub minutes: f64,
    /// Amount charged; priced at the configured rate when omitted.
    #[serde(default)]
    pub cost_dollars: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance_minutes: f64,
}

#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub user_id: UserId,
    pub transactions: Vec<Transaction>,
}

/// Handler for POST /api/v1/ledger/{user_id}/top-up
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn top_up(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<TopUpRequest>,
) -> Result<Json<BalanceResponse>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let balance_minutes = state
        .ledger
        .top_up(&user_id, body.minutes, body.cost_dollars)
        .await?;

    Ok(Json(BalanceResponse {
        user_id,
        balance_minutes,
    }))
}

/// Handler for GET /api/v1/ledger/{user_id}/balance
///
/// Unknown users have a zero balance.
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<BalanceResponse>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let balance_minutes = state.ledger.balance(&user_id).await?;
    Ok(Json(BalanceResponse {
        user_id,
        balance_minutes,
    }))
}

/// Handler for GET /api/v1/ledger/{user_id}/transactions
#[instrument(skip_all, fields(user_id = %user_id))]
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<TransactionsResponse>, ScError> {
    let user_id = parse_user_id(user_id)?;
    let transactions = state.ledger.transactions(&user_id).await?;
    Ok(Json(TransactionsResponse {
        user_id,
        transactions,
    }))
}
