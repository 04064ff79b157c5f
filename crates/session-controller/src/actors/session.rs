//! `SessionActor` - drives one user's video session.
//!
//! ```text
//! Queued ──promotion──▶ Connecting ──ok──────▶ Connected ──┐
//!                           │ ├──billing err──▶ DemoMode ──┤
//!                           │ └──other err────▶ Error ─────┼──▶ Ended
//!                           └──────────────────────────────┘
//! ```
//!
//! The actor owns its slot until the session ends. `finish` is the only path
//! to `Ended`: it releases the slot, bills connected time in whole minutes
//! rounded up and produces the [`SessionSummary`]. Calling it again returns
//! the stored summary, so the release/debit pair runs at most once.
//!
//! Provisioning runs in a spawned task so the mailbox keeps serving views and
//! hangups while the provider call (and its retries) is in flight.

use crate::config::Config;
use crate::errors::ScError;
use crate::ledger::Ledger;
use crate::observability::metrics as prom;
use crate::provider::{create_with_retry, Conversation, ConversationProvider, ProviderError};

use super::admission::AdmissionHandle;
use super::messages::{
    EndReason, PromotionStatus, SessionMessage, SessionState, SessionSummary, SessionView,
    SlotGrant, StartSessionRequest,
};
use super::metrics::{ActorType, MailboxMonitor};

use chrono::Utc;
use common::types::{SessionId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for a session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Maximum accepted feedback comment length in characters.
pub const MAX_FEEDBACK_CHARS: usize = 2000;

/// Message shown to the user when provisioning fails for good.
const PROVISIONING_FAILED_MESSAGE: &str =
    "We couldn't connect you to your specialist. Please try again in a moment.";

/// Timing knobs for session actors, taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub queue_poll_interval: Duration,
    pub max_queue_wait: Duration,
    pub billing_tick: Duration,
    pub provider_max_attempts: u32,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_poll_interval: config.queue_poll_interval,
            max_queue_wait: config.max_queue_wait,
            billing_tick: config.billing_tick,
            provider_max_attempts: config.provider_max_attempts,
        }
    }
}

/// Collaborators shared by every session actor.
#[derive(Clone)]
pub struct SessionDeps {
    pub admission: AdmissionHandle,
    pub ledger: Ledger,
    pub provider: Arc<dyn ConversationProvider>,
    pub settings: SessionSettings,
}

/// Validate a rating and optional comment.
///
/// # Errors
///
/// `InvalidFeedback` if the rating is outside 1..=5 or the comment is too long.
pub fn validate_feedback(rating: u8, comment: Option<&str>) -> Result<(), ScError> {
    if !(1..=5).contains(&rating) {
        return Err(ScError::InvalidFeedback(
            "rating must be between 1 and 5".to_string(),
        ));
    }
    if comment.is_some_and(|c| c.chars().count() > MAX_FEEDBACK_CHARS) {
        return Err(ScError::InvalidFeedback(format!(
            "comment must be at most {MAX_FEEDBACK_CHARS} characters"
        )));
    }
    Ok(())
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: SessionId,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn view(&self) -> Result<SessionView, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::GetView { respond_to: tx })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// End the session. Idempotent: an ended session returns its summary.
    pub async fn end(
        &self,
        reason: EndReason,
        effective_end: Option<Instant>,
    ) -> Result<SessionSummary, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::End {
                reason,
                effective_end,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn submit_feedback(
        &self,
        rating: u8,
        comment: Option<String>,
    ) -> Result<SessionSummary, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionMessage::SubmitFeedback {
                rating,
                comment,
                respond_to: tx,
            })
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))?
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// Per-session actor state.
pub struct SessionActor {
    session_id: SessionId,
    user_id: UserId,
    specialist_ref: String,
    user_name: String,
    context: String,
    deps: SessionDeps,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    mailbox: MailboxMonitor,

    state: SessionState,
    queue_position: usize,
    queued_at: Instant,
    connected_at: Option<Instant>,
    conversation: Option<Conversation>,
    provisioning: Option<JoinHandle<Result<Conversation, ProviderError>>>,
    low_balance_warned: bool,
    slot_released: bool,
    error: Option<String>,
    summary: Option<SessionSummary>,
}

impl SessionActor {
    /// Spawn a session actor for a user who already passed admission.
    ///
    /// `grant` decides the initial state: granted sessions start provisioning
    /// at once, others start `Queued` and poll for promotion.
    pub fn spawn(
        request: StartSessionRequest,
        grant: SlotGrant,
        deps: SessionDeps,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let session_id = SessionId::new();

        let state = if grant.granted {
            SessionState::Connecting
        } else {
            SessionState::Queued
        };

        let actor = Self {
            session_id,
            mailbox: MailboxMonitor::new(ActorType::Session, request.user_id.as_str()),
            user_id: request.user_id,
            specialist_ref: request.specialist_ref,
            user_name: request.user_name,
            context: request.context,
            deps,
            receiver,
            cancel_token: cancel_token.clone(),
            state,
            queue_position: grant.queue_position,
            queued_at: Instant::now(),
            connected_at: None,
            conversation: None,
            provisioning: None,
            low_balance_warned: false,
            slot_released: false,
            error: None,
            summary: None,
        };

        let task_handle = tokio::spawn(actor.run());
        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "sc.actor.session",
        fields(user_id = %self.user_id, session_id = %self.session_id)
    )]
    async fn run(mut self) {
        info!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            session_id = %self.session_id,
            state = ?self.state,
            queue_position = self.queue_position,
            "SessionActor started"
        );

        if self.state == SessionState::Connecting {
            self.start_provisioning();
        }

        let mut queue_poll = tokio::time::interval(self.deps.settings.queue_poll_interval);
        queue_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut billing = tokio::time::interval(self.deps.settings.billing_tick);
        billing.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sc.actor.session",
                        user_id = %self.user_id,
                        "SessionActor received cancellation signal"
                    );
                    self.finish(EndReason::Shutdown, None).await;
                    break;
                }

                _ = queue_poll.tick(), if self.state == SessionState::Queued => {
                    self.poll_queue().await;
                }

                _ = billing.tick(), if self.state == SessionState::Connected => {
                    self.check_balance().await;
                }

                result = join_provisioning(&mut self.provisioning) => {
                    self.provisioning = None;
                    self.on_provisioned(result).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            self.finish(EndReason::Shutdown, None).await;
                            break;
                        }
                    }
                }
            }
        }

        debug!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::GetView { respond_to } => {
                self.refresh_queue_position().await;
                let _ = respond_to.send(self.view());
            }
            SessionMessage::End {
                reason,
                effective_end,
                respond_to,
            } => {
                let summary = self.finish(reason, effective_end).await;
                let _ = respond_to.send(summary);
            }
            SessionMessage::SubmitFeedback {
                rating,
                comment,
                respond_to,
            } => {
                let _ = respond_to.send(self.record_feedback(rating, comment));
            }
        }
    }

    fn view(&self) -> SessionView {
        let queued = self.state == SessionState::Queued;
        let elapsed_seconds = match (&self.summary, self.connected_at) {
            (Some(summary), _) => summary.duration_seconds,
            (None, Some(started)) => started.elapsed().as_secs(),
            (None, None) => 0,
        };

        SessionView {
            session_id: self.session_id,
            user_id: self.user_id.clone(),
            specialist_ref: self.specialist_ref.clone(),
            state: self.state,
            queue_position: queued.then_some(self.queue_position),
            estimated_wait_minutes: queued
                .then(|| self.deps.admission.estimated_wait(self.queue_position)),
            elapsed_seconds,
            low_balance_warning: self.low_balance_warned && self.state == SessionState::Connected,
            join_url: self
                .conversation
                .as_ref()
                .filter(|_| self.state == SessionState::Connected)
                .map(|c| c.join_url.clone()),
            error: self.error.clone(),
            summary: self.summary.clone(),
        }
    }

    /// Read the live position so views track cancellations ahead of us
    /// between poll ticks. Position 0 means promoted; the next poll handles it.
    async fn refresh_queue_position(&mut self) {
        if self.state != SessionState::Queued {
            return;
        }
        match self.deps.admission.position(self.user_id.clone()).await {
            Ok(position) if position > 0 => self.queue_position = position,
            Ok(_) => {}
            Err(e) => {
                debug!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    error = %e,
                    "Queue position lookup failed"
                );
            }
        }
    }

    async fn poll_queue(&mut self) {
        // A grant always wins over the wait cap, even on the tick that reaches it.
        match self.deps.admission.poll_promotion(self.user_id.clone()).await {
            Ok(PromotionStatus::Granted) => {
                info!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    waited_secs = self.queued_at.elapsed().as_secs(),
                    "Promoted from queue"
                );
                self.state = SessionState::Connecting;
                self.queue_position = 0;
                self.start_provisioning();
            }
            Ok(PromotionStatus::Waiting { position }) => {
                self.queue_position = position;
                self.enforce_queue_cap().await;
            }
            Ok(PromotionStatus::NotQueued) => {
                // Released behind our back; the slot is gone already.
                self.slot_released = true;
                self.finish(EndReason::Evicted, None).await;
            }
            Err(e) => {
                warn!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    error = %e,
                    "Promotion poll failed"
                );
                self.enforce_queue_cap().await;
            }
        }
    }

    async fn enforce_queue_cap(&mut self) {
        if self.queued_at.elapsed() < self.deps.settings.max_queue_wait {
            return;
        }
        info!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            waited_secs = self.queued_at.elapsed().as_secs(),
            "Queue wait limit reached"
        );
        self.finish(EndReason::QueueTimeout, None).await;
    }

    fn start_provisioning(&mut self) {
        let provider = Arc::clone(&self.deps.provider);
        let specialist_ref = self.specialist_ref.clone();
        let user_name = self.user_name.clone();
        let context = self.context.clone();
        let max_attempts = self.deps.settings.provider_max_attempts;

        debug!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            specialist_ref = %specialist_ref,
            "Provisioning conversation"
        );

        self.provisioning = Some(tokio::spawn(async move {
            create_with_retry(
                provider.as_ref(),
                &specialist_ref,
                &user_name,
                &context,
                max_attempts,
            )
            .await
        }));
    }

    async fn on_provisioned(
        &mut self,
        result: Result<Result<Conversation, ProviderError>, JoinError>,
    ) {
        if self.state != SessionState::Connecting {
            return;
        }

        match result {
            Ok(Ok(conversation)) => {
                info!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    conversation_id = %conversation.conversation_id,
                    "Session connected"
                );
                self.state = SessionState::Connected;
                self.connected_at = Some(Instant::now());
                self.conversation = Some(conversation);
            }
            Ok(Err(ProviderError::Billing(reason))) => {
                warn!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    reason = %reason,
                    "Provider out of quota, continuing in demo mode"
                );
                self.state = SessionState::DemoMode;
                self.connected_at = Some(Instant::now());
            }
            Ok(Err(err)) => self.fail(&err.to_string()).await,
            Err(join_error) => {
                self.fail(&format!("provisioning task failed: {join_error}"))
                    .await;
            }
        }
    }

    /// Move to `Error` and give the slot back immediately.
    async fn fail(&mut self, detail: &str) {
        error!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            error = %detail,
            "Session provisioning failed"
        );
        self.state = SessionState::Error;
        self.error = Some(PROVISIONING_FAILED_MESSAGE.to_string());
        self.release_slot().await;
    }

    async fn check_balance(&mut self) {
        let Some(connected_at) = self.connected_at else {
            return;
        };

        let balance = match self.deps.ledger.balance(&self.user_id).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    error = %e,
                    "Balance check failed"
                );
                return;
            }
        };

        let remaining_seconds = balance * 60.0 - connected_at.elapsed().as_secs_f64();
        if remaining_seconds <= 0.0 {
            info!(
                target: "sc.actor.session",
                user_id = %self.user_id,
                "Balance exhausted, ending session"
            );
            self.finish(EndReason::BalanceExhausted, None).await;
        } else if !self.low_balance_warned && (remaining_seconds / 60.0).floor() <= 1.0 {
            self.low_balance_warned = true;
            info!(
                target: "sc.actor.session",
                user_id = %self.user_id,
                remaining_seconds = remaining_seconds.floor(),
                "Low balance warning"
            );
        }
    }

    async fn release_slot(&mut self) {
        if self.slot_released {
            return;
        }
        match self.deps.admission.release(self.user_id.clone()).await {
            Ok(_) => self.slot_released = true,
            Err(e) => {
                error!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    error = %e,
                    "Failed to release slot"
                );
            }
        }
    }

    /// Transition to `Ended`. Idempotent.
    async fn finish(
        &mut self,
        reason: EndReason,
        effective_end: Option<Instant>,
    ) -> SessionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        if let Some(task) = self.provisioning.take() {
            // The provider may already have created the conversation; end it
            // once the call resolves.
            let provider = Arc::clone(&self.deps.provider);
            let user_id = self.user_id.clone();
            tokio::spawn(async move {
                if let Ok(Ok(conversation)) = task.await {
                    end_conversation(provider.as_ref(), &user_id, &conversation).await;
                }
            });
        }

        let final_state = self.state;
        let end_at = effective_end.unwrap_or_else(Instant::now);
        let duration = self
            .connected_at
            .map_or(Duration::ZERO, |started| end_at.saturating_duration_since(started));

        self.release_slot().await;

        let (billed_minutes, balance_after) = match final_state {
            SessionState::Connected => self.bill(duration).await,
            SessionState::DemoMode => {
                let description = format!("Demo session with {}", self.specialist_ref);
                if let Err(e) = self
                    .deps
                    .ledger
                    .record_unbilled(&self.user_id, &description)
                    .await
                {
                    warn!(
                        target: "sc.actor.session",
                        user_id = %self.user_id,
                        error = %e,
                        "Failed to record demo session"
                    );
                }
                (0.0, self.deps.ledger.balance(&self.user_id).await.ok())
            }
            _ => (0.0, None),
        };

        if let Some(conversation) = self.conversation.take() {
            let provider = Arc::clone(&self.deps.provider);
            let user_id = self.user_id.clone();
            tokio::spawn(async move {
                end_conversation(provider.as_ref(), &user_id, &conversation).await;
            });
        }

        self.state = SessionState::Ended;
        let summary = SessionSummary {
            session_id: self.session_id,
            specialist_ref: self.specialist_ref.clone(),
            final_state,
            reason,
            duration_seconds: duration.as_secs(),
            billed_minutes,
            balance_after,
            rating: None,
            feedback: None,
            ended_at: Utc::now(),
        };

        prom::record_session_ended(reason.as_str());
        info!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            session_id = %self.session_id,
            final_state = ?final_state,
            reason = reason.as_str(),
            duration_secs = summary.duration_seconds,
            billed_minutes,
            "Session ended"
        );

        self.summary = Some(summary.clone());
        summary
    }

    /// Debit `ceil(seconds / 60)` minutes. Returns (minutes taken, balance after).
    async fn bill(&self, duration: Duration) -> (f64, Option<f64>) {
        let minutes = duration.as_secs().div_ceil(60);
        if minutes == 0 {
            return (0.0, self.deps.ledger.balance(&self.user_id).await.ok());
        }

        let description = format!("Session with {}", self.specialist_ref);
        // u64 to f64 is exact for any realistic session length
        #[allow(clippy::cast_precision_loss)]
        let requested = minutes as f64;

        match self
            .deps
            .ledger
            .debit(&self.user_id, requested, &description)
            .await
        {
            // Clamped debits can take less than requested.
            Ok(outcome) => (outcome.deducted, Some(outcome.balance)),
            Err(e) => {
                error!(
                    target: "sc.actor.session",
                    user_id = %self.user_id,
                    minutes,
                    error = %e,
                    "Failed to bill session"
                );
                (0.0, None)
            }
        }
    }

    fn record_feedback(
        &mut self,
        rating: u8,
        comment: Option<String>,
    ) -> Result<SessionSummary, ScError> {
        validate_feedback(rating, comment.as_deref())?;

        let Some(summary) = self.summary.as_mut() else {
            return Err(ScError::Conflict(
                "Feedback can be submitted once the session has ended".to_string(),
            ));
        };

        summary.rating = Some(rating);
        summary.feedback = comment.filter(|c| !c.trim().is_empty());

        info!(
            target: "sc.actor.session",
            user_id = %self.user_id,
            session_id = %self.session_id,
            rating,
            "Session feedback recorded"
        );
        Ok(summary.clone())
    }
}

/// Best-effort provider teardown.
async fn end_conversation(
    provider: &dyn ConversationProvider,
    user_id: &UserId,
    conversation: &Conversation,
) {
    if let Err(e) = provider
        .end_conversation(&conversation.conversation_id)
        .await
    {
        warn!(
            target: "sc.provider",
            user_id = %user_id,
            conversation_id = %conversation.conversation_id,
            error = %e,
            "Failed to end conversation"
        );
    }
}

/// Resolve the provisioning task, or never if none is running.
async fn join_provisioning(
    task: &mut Option<JoinHandle<Result<Conversation, ProviderError>>>,
) -> Result<Result<Conversation, ProviderError>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
