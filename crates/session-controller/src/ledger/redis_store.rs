//! Redis-backed ledger store.
//!
//! # Key Patterns
//!
//! - `ledger:{user}:balance` - Balance in minutes (decimal string)
//! - `ledger:{user}:transactions` - Transaction records, newest at the head (LIST of JSON)
//!
//! Mutations run as Lua scripts (see [`lua_scripts`](super::lua_scripts)) so the
//! balance update and the transaction append are a single atomic step.
//!
//! The `MultiplexedConnection` is cheap to clone and safe to use concurrently,
//! so each operation clones it instead of locking.

use super::lua_scripts;
use super::store::LedgerStore;
use super::{DebitOutcome, Transaction};
use crate::errors::ScError;
use async_trait::async_trait;
use common::types::UserId;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use tracing::{error, instrument, warn};

/// Ledger store persisted in Redis.
#[derive(Clone)]
pub struct RedisLedgerStore {
    connection: MultiplexedConnection,
    top_up_script: Script,
    debit_script: Script,
    append_script: Script,
}

impl RedisLedgerStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `ScError::Store` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, ScError> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may carry credentials; never log it.
            error!(target: "sc.ledger", error = %e, "Failed to open Redis client");
            ScError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "sc.ledger", error = %e, "Failed to connect to Redis");
                ScError::Store(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            top_up_script: Script::new(lua_scripts::TOP_UP),
            debit_script: Script::new(lua_scripts::DEBIT_CLAMPED),
            append_script: Script::new(lua_scripts::APPEND_RECORD),
        })
    }
}

fn balance_key(user_id: &UserId) -> String {
    format!("ledger:{user_id}:balance")
}

fn transactions_key(user_id: &UserId) -> String {
    format!("ledger:{user_id}:transactions")
}

fn encode(record: &Transaction) -> Result<String, ScError> {
    serde_json::to_string(record)
        .map_err(|e| ScError::Internal(format!("failed to encode transaction: {e}")))
}

fn parse_amount(raw: &str, what: &str) -> Result<f64, ScError> {
    raw.parse::<f64>()
        .map_err(|e| ScError::Store(format!("unparseable {what} '{raw}': {e}")))
}

#[async_trait]
impl LedgerStore for RedisLedgerStore {
    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn credit(
        &self,
        user_id: &UserId,
        minutes: f64,
        record: Transaction,
    ) -> Result<f64, ScError> {
        let mut conn = self.connection.clone();
        let payload = encode(&record)?;

        let balance: String = self
            .top_up_script
            .key(balance_key(user_id))
            .key(transactions_key(user_id))
            .arg(minutes)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "sc.ledger", error = %e, user_id = %user_id, "Top-up script failed");
                ScError::Store(format!("top-up failed: {e}"))
            })?;

        parse_amount(&balance, "balance")
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn debit_clamped(
        &self,
        user_id: &UserId,
        minutes: f64,
        record: Transaction,
    ) -> Result<DebitOutcome, ScError> {
        let mut conn = self.connection.clone();
        let payload = encode(&record)?;

        let (deducted, balance): (String, String) = self
            .debit_script
            .key(balance_key(user_id))
            .key(transactions_key(user_id))
            .arg(minutes)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "sc.ledger", error = %e, user_id = %user_id, "Debit script failed");
                ScError::Store(format!("debit failed: {e}"))
            })?;

        Ok(DebitOutcome {
            deducted: parse_amount(&deducted, "deduction")?,
            balance: parse_amount(&balance, "balance")?,
        })
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn append(&self, user_id: &UserId, record: Transaction) -> Result<(), ScError> {
        let mut conn = self.connection.clone();
        let payload = encode(&record)?;

        let _len: i64 = self
            .append_script
            .key(transactions_key(user_id))
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "sc.ledger", error = %e, user_id = %user_id, "Append script failed");
                ScError::Store(format!("append failed: {e}"))
            })?;

        Ok(())
    }

    async fn balance(&self, user_id: &UserId) -> Result<f64, ScError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn.get(balance_key(user_id)).await.map_err(|e| {
            warn!(target: "sc.ledger", error = %e, user_id = %user_id, "Failed to read balance");
            ScError::Store(format!("balance read failed: {e}"))
        })?;

        match raw {
            Some(raw) => parse_amount(&raw, "balance"),
            None => Ok(0.0),
        }
    }

    async fn transactions(&self, user_id: &UserId) -> Result<Vec<Transaction>, ScError> {
        let mut conn = self.connection.clone();

        let raw: Vec<String> = conn
            .lrange(transactions_key(user_id), 0, -1)
            .await
            .map_err(|e| {
                warn!(target: "sc.ledger", error = %e, user_id = %user_id, "Failed to read transactions");
                ScError::Store(format!("transaction read failed: {e}"))
            })?;

        raw.iter()
            .map(|entry| {
                serde_json::from_str(entry)
                    .map_err(|e| ScError::Store(format!("corrupt transaction record: {e}")))
            })
            .collect()
    }
}
