//! Video conversation provider.
//!
//! Sessions are hosted by an external service that provisions a conversation
//! with a specialist and hands back a join URL. The controller consumes it
//! through [`ConversationProvider`] so the session actors never see transport
//! details, and tests swap in [`mock::MockConversationProvider`].
//!
//! Failures are classified at the boundary:
//!
//! | Class | Meaning | Session outcome |
//! |-------|---------|-----------------|
//! | `Billing` | Provider out of quota/credits | Demo mode, slot kept |
//! | `Retryable` | Timeout, throttling, 5xx | Retried, then treated as fatal |
//! | `Fatal` | Auth, config, bad request | Error state, slot released |

pub mod http;
pub mod mock;

pub use http::HttpConversationProvider;

use crate::observability::metrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Initial delay between provisioning attempts; doubles per retry.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A provisioned conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Provider-side identifier, used to end the conversation.
    pub conversation_id: String,
    /// URL the client opens to join.
    pub join_url: String,
}

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The provider account is out of quota or credits.
    #[error("provider billing error: {0}")]
    Billing(String),

    /// Transient failure worth retrying.
    #[error("provider unavailable: {0}")]
    Retryable(String),

    /// Permanent failure.
    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Metric label for the failure class.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            ProviderError::Billing(_) => "billing",
            ProviderError::Retryable(_) => "retryable",
            ProviderError::Fatal(_) => "fatal",
        }
    }
}

/// External video conversation service.
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    /// Provision a conversation with the given specialist.
    async fn create_conversation(
        &self,
        specialist_ref: &str,
        user_name: &str,
        context: &str,
    ) -> Result<Conversation, ProviderError>;

    /// Tear down a conversation.
    async fn end_conversation(&self, conversation_id: &str) -> Result<(), ProviderError>;
}

/// Provision a conversation, retrying `Retryable` failures with exponential
/// backoff.
///
/// After `max_attempts` the last retryable error is returned as `Fatal`.
/// `Billing` and `Fatal` errors return immediately.
pub async fn create_with_retry(
    provider: &dyn ConversationProvider,
    specialist_ref: &str,
    user_name: &str,
    context: &str,
    max_attempts: u32,
) -> Result<Conversation, ProviderError> {
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;

    loop {
        let started = Instant::now();
        let result = provider
            .create_conversation(specialist_ref, user_name, context)
            .await;
        metrics::record_provider_latency("create_conversation", started.elapsed());

        match result {
            Ok(conversation) => return Ok(conversation),
            Err(ProviderError::Retryable(reason)) if attempt < max_attempts => {
                metrics::record_provider_error("retryable");
                warn!(
                    target: "sc.provider",
                    attempt,
                    max_attempts,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason = %reason,
                    "Provisioning failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(ProviderError::Retryable(reason)) => {
                metrics::record_provider_error("retryable");
                return Err(ProviderError::Fatal(format!(
                    "gave up after {attempt} attempts: {reason}"
                )));
            }
            Err(err) => {
                metrics::record_provider_error(err.class());
                debug!(target: "sc.provider", class = err.class(), "Provisioning failed");
                return Err(err);
            }
        }
    }
}
