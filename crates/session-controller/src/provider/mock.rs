//! Scripted conversation provider for tests.
//!
//! Responses queued with [`MockConversationProvider::with_responses`] are
//! returned in order; once the script runs out every call uses the fallback
//! (success unless the mock was built failing).

use super::{Conversation, ConversationProvider, ProviderError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Mock provider recording every call.
#[derive(Debug, Default)]
pub struct MockConversationProvider {
    script: Mutex<VecDeque<Result<Conversation, ProviderError>>>,
    fallback: Option<ProviderError>,
    create_delay: Option<Duration>,
    create_calls: AtomicUsize,
    ended: Mutex<Vec<String>>,
}

impl MockConversationProvider {
    /// Always provisions successfully.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Always fails with a billing-class error.
    #[must_use]
    pub fn billing_error() -> Self {
        Self::failing_with(ProviderError::Billing(
            "out of conversational credits".to_string(),
        ))
    }

    /// Always fails with a fatal error.
    #[must_use]
    pub fn fatal_error() -> Self {
        Self::failing_with(ProviderError::Fatal("invalid api key".to_string()))
    }

    /// Always fails with `error`.
    #[must_use]
    pub fn failing_with(error: ProviderError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::default()
        }
    }

    /// Returns `responses` in order, then succeeds.
    #[must_use]
    pub fn with_responses(responses: Vec<Result<Conversation, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Make every `create_conversation` call take `delay` before answering.
    #[must_use]
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Number of `create_conversation` calls made.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Conversation ids passed to `end_conversation`, in call order.
    pub fn ended_conversations(&self) -> Vec<String> {
        self.ended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ConversationProvider for MockConversationProvider {
    async fn create_conversation(
        &self,
        specialist_ref: &str,
        _user_name: &str,
        _context: &str,
    ) -> Result<Conversation, ProviderError> {
        let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(response) = scripted {
            return response.map(|_| conversation(specialist_ref, call));
        }

        match &self.fallback {
            Some(error) => Err(error.clone()),
            None => Ok(conversation(specialist_ref, call)),
        }
    }

    async fn end_conversation(&self, conversation_id: &str) -> Result<(), ProviderError> {
        self.ended
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conversation_id.to_string());
        Ok(())
    }
}

fn conversation(specialist_ref: &str, call: usize) -> Conversation {
    Conversation {
        conversation_id: format!("conv-{call}"),
        join_url: format!("https://video.test/{specialist_ref}/conv-{call}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let mock = MockConversationProvider::with_responses(vec![Err(ProviderError::Billing(
            "quota".to_string(),
        ))]);

        assert!(mock.create_conversation("maya", "Alex", "").await.is_err());
        let conversation = mock.create_conversation("maya", "Alex", "").await.unwrap();

        assert_eq!(conversation.conversation_id, "conv-2");
        assert_eq!(mock.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_end_calls_are_recorded() {
        let mock = MockConversationProvider::succeeding();
        mock.end_conversation("conv-9").await.unwrap();
        assert_eq!(mock.ended_conversations(), vec!["conv-9".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_mock_is_sticky() {
        let mock = MockConversationProvider::fatal_error();
        for _ in 0..3 {
            assert!(matches!(
                mock.create_conversation("maya", "Alex", "").await,
                Err(ProviderError::Fatal(_))
            ));
        }
    }
}
