//! `SessionCoordinatorActor` - singleton supervisor for per-user sessions.
//!
//! The coordinator is the only entry point the HTTP layer and the presence
//! monitor use. It owns the `user -> SessionActor` map, refuses new sessions
//! while draining, checks the balance before any slot is requested, and
//! routes heartbeat evictions through the normal end-of-session path so a
//! stale session is billed exactly like a hangup.
//!
//! Ended sessions stay in the map (their actor keeps the summary for the
//! feedback step) until the same user starts a new session.

use crate::errors::ScError;
use crate::observability::metrics as prom;

use super::messages::{
    CoordinatorMessage, CoordinatorStatus, EndReason, EntryState, SessionSummary, SessionView,
    StartSessionRequest,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{validate_feedback, SessionActor, SessionActorHandle, SessionDeps};

use common::types::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 500;

/// How long shutdown waits for each session actor to finish.
const SESSION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the `SessionCoordinatorActor`.
#[derive(Clone, Debug)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl CoordinatorHandle {
    /// Spawn the coordinator.
    ///
    /// Session actors get child tokens of `cancel_token`, so cancelling it
    /// ends every session with `EndReason::Shutdown`.
    #[must_use]
    pub fn new(
        deps: SessionDeps,
        metrics: Arc<ActorMetrics>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = SessionCoordinatorActor {
            receiver,
            cancel_token: cancel_token.clone(),
            deps,
            sessions: HashMap::new(),
            accepting_new: true,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Coordinator, "coordinator"),
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Start a session: balance check, slot request, then a `SessionActor`.
    pub async fn start_session(&self, request: StartSessionRequest) -> Result<SessionView, ScError> {
        self.ask(|respond_to| CoordinatorMessage::StartSession {
            request,
            respond_to,
        })
        .await?
    }

    /// Hang up or leave the queue.
    pub async fn end_session(
        &self,
        user_id: UserId,
        reason: EndReason,
    ) -> Result<SessionSummary, ScError> {
        self.ask(|respond_to| CoordinatorMessage::EndSession {
            user_id,
            reason,
            respond_to,
        })
        .await?
    }

    pub async fn session_view(&self, user_id: UserId) -> Result<SessionView, ScError> {
        self.ask(|respond_to| CoordinatorMessage::GetSession {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Refresh the user's presence.
    pub async fn heartbeat(&self, user_id: UserId) -> Result<(), ScError> {
        self.ask(|respond_to| CoordinatorMessage::Heartbeat {
            user_id,
            respond_to,
        })
        .await?
    }

    pub async fn submit_feedback(
        &self,
        user_id: UserId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<SessionSummary, ScError> {
        self.ask(|respond_to| CoordinatorMessage::SubmitFeedback {
            user_id,
            rating,
            comment,
            respond_to,
        })
        .await?
    }

    /// Evict every entry silent for longer than `timeout`. Returns the count.
    pub async fn expire_stale(&self, timeout: Duration) -> Result<usize, ScError> {
        self.ask(|respond_to| CoordinatorMessage::ExpireStale {
            timeout,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, ScError> {
        self.ask(|respond_to| CoordinatorMessage::GetStatus { respond_to })
            .await?
    }

    /// Stop admitting, end every session, then stop the coordinator.
    pub async fn shutdown(&self) -> Result<(), ScError> {
        self.ask(|respond_to| CoordinatorMessage::Shutdown { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// A supervised session actor.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
}

/// The session supervisor.
struct SessionCoordinatorActor {
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    deps: SessionDeps,
    sessions: HashMap<UserId, ManagedSession>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionCoordinatorActor {
    #[instrument(skip_all, name = "sc.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "sc.actor.coordinator", "SessionCoordinatorActor started");

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.coordinator",
                        "SessionCoordinatorActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sc.actor.coordinator",
                                "SessionCoordinatorActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.coordinator",
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionCoordinatorActor stopped"
        );
    }

    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::StartSession {
                request,
                respond_to,
            } => {
                let _ = respond_to.send(self.start_session(request).await);
            }
            CoordinatorMessage::EndSession {
                user_id,
                reason,
                respond_to,
            } => {
                let _ = respond_to.send(self.end_session(&user_id, reason).await);
            }
            CoordinatorMessage::GetSession {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.session_view(&user_id).await);
            }
            CoordinatorMessage::Heartbeat {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.heartbeat(&user_id).await);
            }
            CoordinatorMessage::SubmitFeedback {
                user_id,
                rating,
                comment,
                respond_to,
            } => {
                let _ = respond_to.send(self.submit_feedback(&user_id, rating, comment).await);
            }
            CoordinatorMessage::ExpireStale {
                timeout,
                respond_to,
            } => {
                let _ = respond_to.send(self.expire_stale(timeout).await);
            }
            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status().await);
            }
            CoordinatorMessage::Shutdown { respond_to } => {
                self.initiate_shutdown().await;
                let _ = respond_to.send(());
                self.cancel_token.cancel();
            }
        }
    }

    async fn start_session(&mut self, request: StartSessionRequest) -> Result<SessionView, ScError> {
        if !self.accepting_new {
            return Err(ScError::Draining);
        }

        let user_id = request.user_id.clone();

        if let Some(existing) = self.sessions.get(&user_id) {
            let view = existing.handle.view().await?;
            if view.state.is_in_progress() {
                return Err(ScError::Conflict(
                    "A session is already in progress for this user".to_string(),
                ));
            }
            self.retire_session(&user_id).await;
        }

        let balance = self.deps.ledger.balance(&user_id).await?;
        if balance <= 0.0 {
            prom::record_admission_request("insufficient_balance");
            info!(
                target: "sc.actor.coordinator",
                user_id = %user_id,
                "Session refused, no balance"
            );
            return Err(ScError::InsufficientBalance);
        }

        let grant = self.deps.admission.request_slot(user_id.clone()).await?;

        let (handle, task_handle) = SessionActor::spawn(
            request,
            grant,
            self.deps.clone(),
            self.cancel_token.child_token(),
        );
        let view = handle.view().await;

        self.sessions.insert(
            user_id.clone(),
            ManagedSession {
                handle,
                task_handle,
            },
        );
        self.metrics.session_spawned();

        info!(
            target: "sc.actor.coordinator",
            user_id = %user_id,
            granted = grant.granted,
            queue_position = grant.queue_position,
            total_sessions = self.sessions.len(),
            "Session started"
        );

        view
    }

    /// Drop an ended or failed session so the user can start another.
    async fn retire_session(&mut self, user_id: &UserId) {
        let Some(managed) = self.sessions.remove(user_id) else {
            return;
        };

        // Error-state sessions have no summary yet; ending them is a no-op otherwise.
        if let Err(e) = managed.handle.end(EndReason::Hangup, None).await {
            warn!(
                target: "sc.actor.coordinator",
                user_id = %user_id,
                error = %e,
                "Failed to end retired session"
            );
        }
        managed.handle.cancel();
        self.metrics.session_removed();

        let user_id = user_id.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, managed.task_handle)
                .await
                .is_err()
            {
                warn!(
                    target: "sc.actor.coordinator",
                    user_id = %user_id,
                    "Retired session actor cleanup timed out"
                );
            }
        });
    }

    async fn end_session(
        &mut self,
        user_id: &UserId,
        reason: EndReason,
    ) -> Result<SessionSummary, ScError> {
        if let Some(managed) = self.sessions.get(user_id) {
            return managed.handle.end(reason, None).await;
        }

        // No session, but clear any orphaned admission entry.
        if self.deps.admission.release(user_id.clone()).await? {
            warn!(
                target: "sc.actor.coordinator",
                user_id = %user_id,
                "Released admission entry with no session"
            );
        }
        Err(ScError::SessionNotFound)
    }

    async fn session_view(&self, user_id: &UserId) -> Result<SessionView, ScError> {
        match self.sessions.get(user_id) {
            Some(managed) => managed.handle.view().await,
            None => Err(ScError::SessionNotFound),
        }
    }

    async fn heartbeat(&self, user_id: &UserId) -> Result<(), ScError> {
        let known = self.deps.admission.heartbeat(user_id.clone()).await?;
        if known || self.sessions.contains_key(user_id) {
            Ok(())
        } else {
            Err(ScError::SessionNotFound)
        }
    }

    async fn submit_feedback(
        &self,
        user_id: &UserId,
        rating: u8,
        comment: Option<String>,
    ) -> Result<SessionSummary, ScError> {
        validate_feedback(rating, comment.as_deref())?;
        match self.sessions.get(user_id) {
            Some(managed) => managed.handle.submit_feedback(rating, comment).await,
            None => Err(ScError::SessionNotFound),
        }
    }

    /// End sessions whose clients went silent.
    ///
    /// Active entries are billed up to their last heartbeat; queued entries
    /// just lose their place. Entries without a session are released
    /// directly.
    async fn expire_stale(&mut self, timeout: Duration) -> usize {
        let stale = match self.deps.admission.collect_stale(timeout).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(
                    target: "sc.actor.coordinator",
                    error = %e,
                    "Failed to collect stale entries"
                );
                return 0;
            }
        };

        let mut evicted = 0;
        for entry in stale {
            let effective_end = (entry.state == EntryState::Active).then_some(entry.last_seen);

            let result = match self.sessions.get(&entry.user_id) {
                Some(managed) => managed
                    .handle
                    .end(EndReason::HeartbeatTimeout, effective_end)
                    .await
                    .map(|_| ()),
                None => self
                    .deps
                    .admission
                    .release(entry.user_id.clone())
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => {
                    evicted += 1;
                    prom::record_presence_eviction(entry.state.as_str());
                    info!(
                        target: "sc.actor.coordinator",
                        user_id = %entry.user_id,
                        state = entry.state.as_str(),
                        silent_secs = entry.last_seen.elapsed().as_secs(),
                        "Evicted stale entry"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "sc.actor.coordinator",
                        user_id = %entry.user_id,
                        error = %e,
                        "Failed to evict stale entry"
                    );
                }
            }
        }

        evicted
    }

    async fn status(&self) -> Result<CoordinatorStatus, ScError> {
        let admission = self.deps.admission.status().await?;
        Ok(CoordinatorStatus {
            sessions: self.sessions.len(),
            accepting_new: self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            admission,
        })
    }

    /// Refuse new work and end every live session.
    async fn initiate_shutdown(&mut self) {
        info!(
            target: "sc.actor.coordinator",
            session_count = self.sessions.len(),
            "Initiating graceful shutdown"
        );
        self.accepting_new = false;

        if let Err(e) = self.deps.admission.begin_drain().await {
            warn!(
                target: "sc.actor.coordinator",
                error = %e,
                "Failed to put admission into drain mode"
            );
        }

        for (user_id, managed) in &self.sessions {
            if let Err(e) = managed.handle.end(EndReason::Shutdown, None).await {
                warn!(
                    target: "sc.actor.coordinator",
                    user_id = %user_id,
                    error = %e,
                    "Failed to end session during shutdown"
                );
            }
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        for (user_id, managed) in self.sessions.drain() {
            match tokio::time::timeout(SESSION_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sc.actor.coordinator",
                        user_id = %user_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sc.actor.coordinator",
                        user_id = %user_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sc.actor.coordinator",
                        user_id = %user_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.metrics.session_removed();
        }

        info!(target: "sc.actor.coordinator", "Graceful shutdown complete");
    }

    /// Reap session actors whose task ended on its own.
    ///
    /// A session task only exits when cancelled, so a finished task outside
    /// shutdown means it panicked. Its slot is released here since the actor
    /// could not do it.
    async fn check_session_health(&mut self) {
        let finished: Vec<UserId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(user_id, _)| user_id.clone())
            .collect();

        for user_id in finished {
            let Some(managed) = self.sessions.remove(&user_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "sc.actor.coordinator",
                        user_id = %user_id,
                        "Session actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sc.actor.coordinator",
                            user_id = %user_id,
                            error = ?join_error,
                            "Session actor panicked - releasing its slot"
                        );
                        self.metrics.record_panic(ActorType::Session);
                    }
                    if let Err(e) = self.deps.admission.release(user_id.clone()).await {
                        error!(
                            target: "sc.actor.coordinator",
                            user_id = %user_id,
                            error = %e,
                            "Failed to release slot of dead session"
                        );
                    }
                }
            }

            self.metrics.session_removed();
        }
    }
}
