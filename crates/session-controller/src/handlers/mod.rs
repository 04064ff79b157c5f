//! HTTP request handlers for the session controller.
//!
//! - [`sessions`] - start, view, hang up, heartbeat, feedback
//! - [`admission`] - capacity status and queue position
//! - [`ledger`] - top-ups, balances and transaction history
//! - [`metrics`] - Prometheus scrape endpoint

pub mod admission;
pub mod ledger;
pub mod metrics;
pub mod sessions;

pub use admission::{admission_status, queue_position};
pub use ledger::{get_balance, list_transactions, top_up};
pub use metrics::metrics_handler;
pub use sessions::{end_session, get_session, heartbeat, start_session, submit_feedback};

use crate::errors::ScError;
use common::types::UserId;

/// Validate a user id taken from the request path.
pub(crate) fn parse_user_id(raw: String) -> Result<UserId, ScError> {
    UserId::parse(raw).map_err(|e| ScError::BadRequest(format!("Invalid user id: {e}")))
}
