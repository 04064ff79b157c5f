//! Billing ledger: per-user minute balances and an append-only transaction log.
//!
//! [`Ledger`] validates amounts, prices top-ups and emits logs and metrics,
//! then delegates the atomic mutation to a [`LedgerStore`]:
//!
//! - [`InMemoryLedgerStore`] - per-user mutex, used when no Redis URL is set
//! - [`RedisLedgerStore`] - Lua scripts, shared across instances
//!
//! Balances are never negative. Debits clamp at zero and record only what was
//! actually deducted.

pub mod lua_scripts;
pub mod redis_store;
pub mod store;

pub use redis_store::RedisLedgerStore;
pub use store::{InMemoryLedgerStore, LedgerStore};

use crate::errors::ScError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::types::{TransactionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome recorded on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// A real top-up or a billed session.
    Completed,
    /// A session that ran in demo mode and was not billed.
    Demo,
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
    /// Positive for top-ups, negative for session debits.
    pub amount_minutes: f64,
    pub cost_dollars: Option<f64>,
    pub description: String,
    pub status: TransactionStatus,
}

impl Transaction {
    /// Build a new record stamped with the current time.
    #[must_use]
    pub fn new(
        user_id: UserId,
        amount_minutes: f64,
        cost_dollars: Option<f64>,
        description: impl Into<String>,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            timestamp: Utc::now(),
            amount_minutes,
            cost_dollars,
            description: description.into(),
            status,
        }
    }
}

/// Result of a debit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DebitOutcome {
    /// Minutes actually removed (at most the prior balance).
    pub deducted: f64,
    /// Balance after the debit.
    pub balance: f64,
}

/// Round a dollar amount to cents.
fn round_cents(dollars: f64) -> f64 {
    (dollars * 100.0).round() / 100.0
}

/// Ledger facade shared by the HTTP layer and the session actors.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    price_per_minute: f64,
}

impl Ledger {
    /// Create a ledger over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, price_per_minute: f64) -> Self {
        Self {
            store,
            price_per_minute,
        }
    }

    /// Create a ledger backed by an [`InMemoryLedgerStore`].
    #[must_use]
    pub fn in_memory(price_per_minute: f64) -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()), price_per_minute)
    }

    /// Price of `minutes` in dollars, rounded to cents.
    #[must_use]
    pub fn quote(&self, minutes: f64) -> f64 {
        round_cents(minutes * self.price_per_minute)
    }

    /// Add minutes to a user's balance. Returns the new balance.
    ///
    /// When `cost_dollars` is `None` the top-up is priced with [`quote`](Self::quote).
    ///
    /// # Errors
    ///
    /// `InvalidAmount` for non-positive or non-finite minutes or a negative
    /// cost; `Store` if persistence fails.
    pub async fn top_up(
        &self,
        user_id: &UserId,
        minutes: f64,
        cost_dollars: Option<f64>,
    ) -> Result<f64, ScError> {
        if !minutes.is_finite() || minutes <= 0.0 {
            return Err(ScError::InvalidAmount(
                "minutes must be a positive number".to_string(),
            ));
        }
        let cost = match cost_dollars {
            Some(cost) if !cost.is_finite() || cost < 0.0 => {
                return Err(ScError::InvalidAmount(
                    "cost must be a non-negative number".to_string(),
                ));
            }
            Some(cost) => round_cents(cost),
            None => self.quote(minutes),
        };

        let record = Transaction::new(
            user_id.clone(),
            minutes,
            Some(cost),
            format!("Added {minutes} minutes"),
            TransactionStatus::Completed,
        );
        let balance = self.store.credit(user_id, minutes, record).await?;

        metrics::record_ledger_operation("top_up");
        info!(
            target: "sc.ledger",
            user_id = %user_id,
            minutes,
            cost_dollars = cost,
            balance,
            "Balance topped up"
        );
        Ok(balance)
    }

    /// Deduct minutes, clamped so the balance never goes negative.
    ///
    /// A zero deduction (empty balance or `minutes == 0`) appends nothing.
    ///
    /// # Errors
    ///
    /// `InvalidAmount` for negative or non-finite minutes; `Store` if
    /// persistence fails.
    pub async fn debit(
        &self,
        user_id: &UserId,
        minutes: f64,
        description: &str,
    ) -> Result<DebitOutcome, ScError> {
        if !minutes.is_finite() || minutes < 0.0 {
            return Err(ScError::InvalidAmount(
                "minutes must be a non-negative number".to_string(),
            ));
        }

        let template = Transaction::new(
            user_id.clone(),
            0.0,
            None,
            description,
            TransactionStatus::Completed,
        );
        let outcome = self
            .store
            .debit_clamped(user_id, minutes, template)
            .await?;

        metrics::record_ledger_operation("debit");
        if outcome.deducted < minutes {
            info!(
                target: "sc.ledger",
                user_id = %user_id,
                requested = minutes,
                deducted = outcome.deducted,
                "Debit clamped at zero balance"
            );
        } else {
            debug!(
                target: "sc.ledger",
                user_id = %user_id,
                deducted = outcome.deducted,
                balance = outcome.balance,
                "Balance debited"
            );
        }
        Ok(outcome)
    }

    /// Record a session that was not billed (demo mode).
    ///
    /// # Errors
    ///
    /// `Store` if persistence fails.
    pub async fn record_unbilled(&self, user_id: &UserId, description: &str) -> Result<(), ScError> {
        let record = Transaction::new(
            user_id.clone(),
            0.0,
            None,
            description,
            TransactionStatus::Demo,
        );
        self.store.append(user_id, record).await?;
        metrics::record_ledger_operation("record_unbilled");
        Ok(())
    }

    /// Current balance in minutes (zero for unknown users).
    ///
    /// # Errors
    ///
    /// `Store` if the read fails.
    pub async fn balance(&self, user_id: &UserId) -> Result<f64, ScError> {
        self.store.balance(user_id).await
    }

    /// Transaction history, most recent first.
    ///
    /// # Errors
    ///
    /// `Store` if the read fails.
    pub async fn transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, ScError> {
        self.store.transactions(user_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_top_up_then_debit_leaves_difference() {
        let ledger = Ledger::in_memory(1.5);
        let alice = user("alice");

        ledger.top_up(&alice, 20.0, Some(30.0)).await.unwrap();
        ledger.debit(&alice, 5.0, "Session").await.unwrap();

        assert!((ledger.balance(&alice).await.unwrap() - 15.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let ledger = Ledger::in_memory(1.5);
        let bob = user("bob");
        ledger.top_up(&bob, 2.0, None).await.unwrap();

        for minutes in [1.0, 5.0, 0.5, 3.0] {
            let outcome = ledger.debit(&bob, minutes, "Session").await.unwrap();
            assert!(outcome.balance >= 0.0);
            assert!(ledger.balance(&bob).await.unwrap() >= 0.0);
        }
        assert!(ledger.balance(&bob).await.unwrap().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_top_up_rejects_invalid_amounts() {
        let ledger = Ledger::in_memory(1.5);
        let alice = user("alice");

        for minutes in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                ledger.top_up(&alice, minutes, None).await,
                Err(ScError::InvalidAmount(_))
            ));
        }
        assert!(matches!(
            ledger.top_up(&alice, 10.0, Some(-1.0)).await,
            Err(ScError::InvalidAmount(_))
        ));
        assert!(ledger.transactions(&alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_debit_rejects_negative_minutes() {
        let ledger = Ledger::in_memory(1.5);
        assert!(matches!(
            ledger.debit(&user("alice"), -1.0, "Session").await,
            Err(ScError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_top_up_is_priced_when_cost_missing() {
        let ledger = Ledger::in_memory(1.5);
        let alice = user("alice");

        ledger.top_up(&alice, 10.0, None).await.unwrap();

        let history = ledger.transactions(&alice).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cost_dollars, Some(15.0));
        assert_eq!(history[0].status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn test_transactions_are_newest_first() {
        let ledger = Ledger::in_memory(1.5);
        let alice = user("alice");

        ledger.top_up(&alice, 10.0, None).await.unwrap();
        ledger.debit(&alice, 3.0, "Session with Maya").await.unwrap();
        ledger
            .record_unbilled(&alice, "Demo session with Maya")
            .await
            .unwrap();

        let history = ledger.transactions(&alice).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].status, TransactionStatus::Demo);
        assert!(history[0].amount_minutes.abs() < f64::EPSILON);
        assert!((history[1].amount_minutes + 3.0).abs() < f64::EPSILON);
        assert!((history[2].amount_minutes - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quote_rounds_to_cents() {
        let ledger = Ledger::in_memory(1.333);
        assert!((ledger.quote(3.0) - 4.0).abs() < f64::EPSILON);
        assert!((ledger.quote(1.0) - 1.33).abs() < 1e-9);
    }

    #[test]
    fn test_transaction_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Demo).unwrap(),
            "\"demo\""
        );
    }
}
