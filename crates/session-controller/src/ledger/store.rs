//! Ledger persistence.
//!
//! [`LedgerStore`] is the seam between the [`Ledger`](super::Ledger) facade
//! and the backing store. Implementations must make each mutation atomic per
//! user: a balance update and its transaction append are observed together,
//! and two concurrent debits never both read the same starting balance.

use super::{DebitOutcome, Transaction};
use crate::errors::ScError;
use async_trait::async_trait;
use common::types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Backing store for balances and transaction history.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Add `minutes` to the balance and append `record`. Returns the new balance.
    async fn credit(
        &self,
        user_id: &UserId,
        minutes: f64,
        record: Transaction,
    ) -> Result<f64, ScError>;

    /// Deduct up to `minutes`, never going below zero.
    ///
    /// `record.amount_minutes` is overwritten with the negated deducted
    /// amount. No record is appended when nothing was deducted.
    async fn debit_clamped(
        &self,
        user_id: &UserId,
        minutes: f64,
        record: Transaction,
    ) -> Result<DebitOutcome, ScError>;

    /// Append a record without changing the balance.
    async fn append(&self, user_id: &UserId, record: Transaction) -> Result<(), ScError>;

    /// Current balance; zero for unknown users.
    async fn balance(&self, user_id: &UserId) -> Result<f64, ScError>;

    /// Transaction history, most recent first.
    async fn transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, ScError>;
}

#[derive(Debug, Default)]
struct Account {
    balance: f64,
    /// Oldest first; reversed on read.
    transactions: Vec<Transaction>,
}

/// In-process ledger store.
///
/// Each account sits behind its own mutex so mutations for one user are
/// serialized without blocking other users. The outer map lock is only held
/// long enough to look up or insert the account.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    accounts: RwLock<HashMap<UserId, Arc<Mutex<Account>>>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn account(&self, user_id: &UserId) -> Arc<Mutex<Account>> {
        {
            let accounts = self.accounts.read().await;
            if let Some(account) = accounts.get(user_id) {
                return Arc::clone(account);
            }
        }

        let mut accounts = self.accounts.write().await;
        Arc::clone(accounts.entry(user_id.clone()).or_default())
    }

    async fn existing_account(&self, user_id: &UserId) -> Option<Arc<Mutex<Account>>> {
        self.accounts.read().await.get(user_id).map(Arc::clone)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn credit(
        &self,
        user_id: &UserId,
        minutes: f64,
        record: Transaction,
    ) -> Result<f64, ScError> {
        let account = self.account(user_id).await;
        let mut account = account.lock().await;

        account.balance += minutes;
        account.transactions.push(record);
        Ok(account.balance)
    }

    async fn debit_clamped(
        &self,
        user_id: &UserId,
        minutes: f64,
        mut record: Transaction,
    ) -> Result<DebitOutcome, ScError> {
        let account = self.account(user_id).await;
        let mut account = account.lock().await;

        let deducted = account.balance.max(0.0).min(minutes);
        if deducted > 0.0 {
            account.balance = (account.balance - deducted).max(0.0);
            record.amount_minutes = -deducted;
            account.transactions.push(record);
        }

        Ok(DebitOutcome {
            deducted,
            balance: account.balance,
        })
    }

    async fn append(&self, user_id: &UserId, record: Transaction) -> Result<(), ScError> {
        let account = self.account(user_id).await;
        account.lock().await.transactions.push(record);
        Ok(())
    }

    async fn balance(&self, user_id: &UserId) -> Result<f64, ScError> {
        match self.existing_account(user_id).await {
            Some(account) => Ok(account.lock().await.balance),
            None => Ok(0.0),
        }
    }

    async fn transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, ScError> {
        match self.existing_account(user_id).await {
            Some(account) => Ok(account
                .lock()
                .await
                .transactions
                .iter()
                .rev()
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }
}
