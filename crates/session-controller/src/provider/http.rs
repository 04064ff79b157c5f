//! JSON-over-HTTP conversation provider client.
//!
//! - `POST {base}/v1/conversations` creates a conversation
//! - `POST {base}/v1/conversations/{id}/end` ends it
//!
//! Requests authenticate with an `x-api-key` header. The key is held in a
//! `SecretString` and only exposed when building the request.

use super::{Conversation, ConversationProvider, ProviderError};
use crate::observability::metrics;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

/// Timeout for a single provider request.
const PROVIDER_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Connect timeout for provider requests.
const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    specialist_ref: &'a str,
    user_name: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    conversational_context: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    conversation_id: String,
    #[serde(alias = "conversation_url")]
    join_url: String,
}

/// HTTP client for the video conversation provider.
#[derive(Clone)]
pub struct HttpConversationProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
}

impl HttpConversationProvider {
    /// Build a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Fatal` if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: SecretString) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(PROVIDER_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "sc.provider", error = %e, "Failed to build HTTP client");
                ProviderError::Fatal(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, &body);
        warn!(
            target: "sc.provider",
            status = %status,
            class = err.class(),
            "Provider returned error status"
        );
        Err(err)
    }
}

/// Classify a non-success HTTP response.
#[must_use]
pub fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("status {status}");

    if status == StatusCode::PAYMENT_REQUIRED || mentions_quota(body) {
        return ProviderError::Billing(detail);
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return ProviderError::Retryable(detail);
    }
    ProviderError::Fatal(detail)
}

fn mentions_quota(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    ["quota", "credits", "out of credit", "insufficient funds"]
        .iter()
        .any(|needle| body.contains(needle))
}

/// Classify a transport-level failure.
fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Retryable(format!("request timed out: {err}"))
    } else {
        ProviderError::Fatal(format!("request failed: {err}"))
    }
}

#[async_trait]
impl ConversationProvider for HttpConversationProvider {
    #[instrument(skip_all, fields(specialist_ref = %specialist_ref))]
    async fn create_conversation(
        &self,
        specialist_ref: &str,
        user_name: &str,
        context: &str,
    ) -> Result<Conversation, ProviderError> {
        let url = format!("{}/v1/conversations", self.base_url);
        let request = CreateConversationRequest {
            specialist_ref,
            user_name,
            conversational_context: context,
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "sc.provider", error = %e, "Create conversation request failed");
                classify_transport(&e)
            })?;

        let body: CreateConversationResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| {
                error!(target: "sc.provider", error = %e, "Failed to parse provider response");
                ProviderError::Fatal(format!("malformed provider response: {e}"))
            })?;

        Ok(Conversation {
            conversation_id: body.conversation_id,
            join_url: body.join_url,
        })
    }

    #[instrument(skip_all, fields(conversation_id = %conversation_id))]
    async fn end_conversation(&self, conversation_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/v1/conversations/{conversation_id}/end", self.base_url);
        let started = Instant::now();

        let result = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| {
                warn!(target: "sc.provider", error = %e, "End conversation request failed");
                classify_transport(&e)
            });
        metrics::record_provider_latency("end_conversation", started.elapsed());

        Self::check(result?).await.map(|_| ())
    }
}
