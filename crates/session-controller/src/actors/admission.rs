//! `AdmissionActor` - the single writer for session slots and the wait queue.
//!
//! Every capacity-affecting operation runs inside this actor's message loop,
//! so check-then-act sequences (is a slot free? is this user at the head?)
//! execute atomically without locks. Per-user state moves
//! `NONE -> QUEUED -> ACTIVE -> NONE`, and a user is never both queued and
//! active.
//!
//! Promotion is strict FIFO by enqueue sequence. When a release frees a slot
//! the actor promotes from the head of the queue immediately, so capacity is
//! never idle while someone waits; queued sessions observe the promotion on
//! their next poll.

use crate::errors::ScError;
use crate::observability::metrics as prom;

use super::messages::{
    AdmissionMessage, AdmissionStatus, EntryState, PromotionStatus, SlotGrant, StaleEntry,
};
use super::metrics::{ActorType, MailboxMonitor};

use common::types::UserId;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Channel buffer size for the admission mailbox.
const ADMISSION_CHANNEL_BUFFER: usize = 1000;

/// Advisory wait estimate: `(position - 1) * average_session_minutes`.
#[must_use]
pub fn estimated_wait_minutes(position: usize, average_session_minutes: u64) -> u64 {
    let ahead = u64::try_from(position.saturating_sub(1)).unwrap_or(u64::MAX);
    ahead.saturating_mul(average_session_minutes)
}

/// Handle to the `AdmissionActor`.
#[derive(Clone)]
pub struct AdmissionHandle {
    sender: mpsc::Sender<AdmissionMessage>,
    cancel_token: CancellationToken,
    average_session_minutes: u64,
}

impl AdmissionHandle {
    /// Spawn the admission actor.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum concurrent sessions (>= 1)
    /// * `average_session_minutes` - Used only for wait estimates
    /// * `cancel_token` - Child of the service's root token
    #[must_use]
    pub fn new(
        capacity: usize,
        average_session_minutes: u64,
        cancel_token: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(ADMISSION_CHANNEL_BUFFER);

        let actor = AdmissionActor {
            receiver,
            cancel_token: cancel_token.clone(),
            capacity: capacity.max(1),
            active: HashMap::new(),
            queue: VecDeque::new(),
            next_seq: 0,
            draining: false,
            mailbox: MailboxMonitor::new(ActorType::Admission, "admission"),
        };
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            average_session_minutes,
        }
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AdmissionMessage,
    ) -> Result<T, ScError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ScError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ScError::Internal(format!("response receive failed: {e}")))
    }

    /// Reserve a slot, or enqueue if none is free or others are waiting.
    ///
    /// Idempotent: a user already active or queued gets their current state.
    pub async fn request_slot(&self, user_id: UserId) -> Result<SlotGrant, ScError> {
        self.ask(|respond_to| AdmissionMessage::RequestSlot {
            user_id,
            respond_to,
        })
        .await?
    }

    /// Check promotion for a queued user.
    pub async fn poll_promotion(&self, user_id: UserId) -> Result<PromotionStatus, ScError> {
        self.ask(|respond_to| AdmissionMessage::PollPromotion {
            user_id,
            respond_to,
        })
        .await
    }

    /// Release the user's slot or queue entry. Unknown users are a no-op.
    ///
    /// Returns whether an entry was removed.
    pub async fn release(&self, user_id: UserId) -> Result<bool, ScError> {
        self.ask(|respond_to| AdmissionMessage::Release {
            user_id,
            respond_to,
        })
        .await
    }

    /// 1-based queue position, 0 if the user is not queued.
    pub async fn position(&self, user_id: UserId) -> Result<usize, ScError> {
        self.ask(|respond_to| AdmissionMessage::Position {
            user_id,
            respond_to,
        })
        .await
    }

    /// Advisory wait estimate for a queue position.
    #[must_use]
    pub fn estimated_wait(&self, position: usize) -> u64 {
        estimated_wait_minutes(position, self.average_session_minutes)
    }

    /// Refresh last-seen. Returns false for unknown users.
    pub async fn heartbeat(&self, user_id: UserId) -> Result<bool, ScError> {
        self.ask(|respond_to| AdmissionMessage::Heartbeat {
            user_id,
            respond_to,
        })
        .await
    }

    /// Entries whose last-seen is older than `timeout`.
    pub async fn collect_stale(&self, timeout: Duration) -> Result<Vec<StaleEntry>, ScError> {
        self.ask(|respond_to| AdmissionMessage::CollectStale {
            timeout,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<AdmissionStatus, ScError> {
        self.ask(|respond_to| AdmissionMessage::GetStatus { respond_to })
            .await
    }

    /// Refuse new slot requests with `Draining`.
    pub async fn begin_drain(&self) -> Result<(), ScError> {
        self.ask(|respond_to| AdmissionMessage::BeginDrain { respond_to })
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

#[derive(Debug)]
struct ActiveSlot {
    acquired_at: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
struct QueueEntry {
    user_id: UserId,
    /// FIFO tie-break for entries enqueued at the same instant.
    seq: u64,
    enqueued_at: Instant,
    last_seen: Instant,
}

/// The admission arbiter.
struct AdmissionActor {
    receiver: mpsc::Receiver<AdmissionMessage>,
    cancel_token: CancellationToken,
    capacity: usize,
    active: HashMap<UserId, ActiveSlot>,
    /// Ordered by `seq`; entries are only ever pushed at the back.
    queue: VecDeque<QueueEntry>,
    next_seq: u64,
    draining: bool,
    mailbox: MailboxMonitor,
}

impl AdmissionActor {
    #[instrument(skip_all, name = "sc.actor.admission", fields(capacity = self.capacity))]
    async fn run(mut self) {
        info!(
            target: "sc.actor.admission",
            capacity = self.capacity,
            "AdmissionActor started"
        );
        self.publish_gauges();

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sc.actor.admission",
                        "AdmissionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "sc.actor.admission",
                                "AdmissionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sc.actor.admission",
            active = self.active.len(),
            queued = self.queue.len(),
            messages_processed = self.mailbox.messages_processed(),
            "AdmissionActor stopped"
        );
    }

    fn handle_message(&mut self, message: AdmissionMessage) {
        match message {
            AdmissionMessage::RequestSlot {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.request_slot(user_id));
            }
            AdmissionMessage::PollPromotion {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.poll_promotion(&user_id));
            }
            AdmissionMessage::Release {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.release(&user_id));
            }
            AdmissionMessage::Position {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.position(&user_id));
            }
            AdmissionMessage::Heartbeat {
                user_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.heartbeat(&user_id));
            }
            AdmissionMessage::CollectStale {
                timeout,
                respond_to,
            } => {
                let _ = respond_to.send(self.collect_stale(timeout));
            }
            AdmissionMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            AdmissionMessage::BeginDrain { respond_to } => {
                self.draining = true;
                info!(
                    target: "sc.actor.admission",
                    active = self.active.len(),
                    queued = self.queue.len(),
                    "Admission draining, new requests refused"
                );
                let _ = respond_to.send(());
            }
        }
    }

    fn request_slot(&mut self, user_id: UserId) -> Result<SlotGrant, ScError> {
        if self.active.contains_key(&user_id) {
            prom::record_admission_request("existing");
            return Ok(SlotGrant {
                granted: true,
                queue_position: 0,
            });
        }
        let position = self.position(&user_id);
        if position > 0 {
            prom::record_admission_request("existing");
            return Ok(SlotGrant {
                granted: false,
                queue_position: position,
            });
        }

        if self.draining {
            prom::record_admission_request("draining");
            return Err(ScError::Draining);
        }

        let now = Instant::now();
        if self.active.len() < self.capacity && self.queue.is_empty() {
            self.active.insert(
                user_id.clone(),
                ActiveSlot {
                    acquired_at: now,
                    last_seen: now,
                },
            );
            prom::record_admission_request("granted");
            self.publish_gauges();
            debug!(
                target: "sc.actor.admission",
                user_id = %user_id,
                active = self.active.len(),
                "Slot granted"
            );
            return Ok(SlotGrant {
                granted: true,
                queue_position: 0,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push_back(QueueEntry {
            user_id: user_id.clone(),
            seq,
            enqueued_at: now,
            last_seen: now,
        });
        let position = self.queue.len();

        prom::record_admission_request("queued");
        self.publish_gauges();
        info!(
            target: "sc.actor.admission",
            user_id = %user_id,
            position,
            active = self.active.len(),
            "Capacity full, user queued"
        );
        Ok(SlotGrant {
            granted: false,
            queue_position: position,
        })
    }

    fn poll_promotion(&mut self, user_id: &UserId) -> PromotionStatus {
        if self.active.contains_key(user_id) {
            return PromotionStatus::Granted;
        }

        match self.queue.iter().position(|e| &e.user_id == user_id) {
            Some(0) if self.active.len() < self.capacity => {
                self.promote_head();
                self.publish_gauges();
                PromotionStatus::Granted
            }
            Some(index) => PromotionStatus::Waiting {
                position: index + 1,
            },
            None => PromotionStatus::NotQueued,
        }
    }

    fn release(&mut self, user_id: &UserId) -> bool {
        if let Some(slot) = self.active.remove(user_id) {
            info!(
                target: "sc.actor.admission",
                user_id = %user_id,
                held_secs = slot.acquired_at.elapsed().as_secs(),
                "Slot released"
            );
            self.promote_waiting();
            self.publish_gauges();
            return true;
        }

        let before = self.queue.len();
        self.queue.retain(|e| &e.user_id != user_id);
        if self.queue.len() < before {
            info!(
                target: "sc.actor.admission",
                user_id = %user_id,
                "Queue entry released"
            );
            self.publish_gauges();
            return true;
        }

        false
    }

    /// Promote from the head while slots are free.
    fn promote_waiting(&mut self) {
        while self.active.len() < self.capacity && !self.queue.is_empty() {
            self.promote_head();
        }
    }

    fn promote_head(&mut self) {
        if let Some(entry) = self.queue.pop_front() {
            let now = Instant::now();
            info!(
                target: "sc.actor.admission",
                user_id = %entry.user_id,
                seq = entry.seq,
                waited_secs = now.duration_since(entry.enqueued_at).as_secs(),
                "Queued user promoted"
            );
            self.active.insert(
                entry.user_id,
                ActiveSlot {
                    acquired_at: now,
                    last_seen: now,
                },
            );
        }
    }

    fn position(&self, user_id: &UserId) -> usize {
        self.queue
            .iter()
            .position(|e| &e.user_id == user_id)
            .map_or(0, |index| index + 1)
    }

    fn heartbeat(&mut self, user_id: &UserId) -> bool {
        let now = Instant::now();
        if let Some(slot) = self.active.get_mut(user_id) {
            slot.last_seen = now;
            return true;
        }
        if let Some(entry) = self.queue.iter_mut().find(|e| &e.user_id == user_id) {
            entry.last_seen = now;
            return true;
        }
        false
    }

    fn collect_stale(&self, timeout: Duration) -> Vec<StaleEntry> {
        let now = Instant::now();
        let is_stale = |last_seen: Instant| now.duration_since(last_seen) > timeout;

        let active = self
            .active
            .iter()
            .filter(|(_, slot)| is_stale(slot.last_seen))
            .map(|(user_id, slot)| StaleEntry {
                user_id: user_id.clone(),
                state: EntryState::Active,
                last_seen: slot.last_seen,
            });
        let queued = self
            .queue
            .iter()
            .filter(|e| is_stale(e.last_seen))
            .map(|e| StaleEntry {
                user_id: e.user_id.clone(),
                state: EntryState::Queued,
                last_seen: e.last_seen,
            });

        active.chain(queued).collect()
    }

    fn status(&self) -> AdmissionStatus {
        AdmissionStatus {
            capacity: self.capacity,
            active: self.active.len(),
            queued: self.queue.len(),
            draining: self.draining,
        }
    }

    fn publish_gauges(&self) {
        prom::set_slots_active(self.active.len());
        prom::set_queue_depth(self.queue.len());
    }
}
