//! Message types for actor communication.
//!
//! All inter-actor communication uses `tokio::sync::mpsc` mailboxes; request-reply
//! uses `tokio::sync::oneshot`. The DTOs returned to the HTTP layer live here
//! too so handlers depend only on this module.

use crate::errors::ScError;
use chrono::{DateTime, Utc};
use common::types::{SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

// ============================================================================
// Admission
// ============================================================================

/// Messages sent to `AdmissionActor`.
#[derive(Debug)]
pub enum AdmissionMessage {
    /// Reserve a slot or join the queue.
    RequestSlot {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<SlotGrant, ScError>>,
    },

    /// Check whether a queued user has been (or can now be) promoted.
    PollPromotion {
        user_id: UserId,
        respond_to: oneshot::Sender<PromotionStatus>,
    },

    /// Drop the user's slot or queue entry. Replies whether anything was removed.
    Release {
        user_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// 1-based queue position, 0 if not queued.
    Position {
        user_id: UserId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Refresh the user's last-seen timestamp.
    Heartbeat {
        user_id: UserId,
        respond_to: oneshot::Sender<bool>,
    },

    /// List entries silent for longer than `timeout` (not removed).
    CollectStale {
        timeout: Duration,
        respond_to: oneshot::Sender<Vec<StaleEntry>>,
    },

    /// Current occupancy.
    GetStatus {
        respond_to: oneshot::Sender<AdmissionStatus>,
    },

    /// Refuse new slot requests from now on.
    BeginDrain { respond_to: oneshot::Sender<()> },
}

/// Result of a slot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotGrant {
    /// True if the user holds an active slot.
    pub granted: bool,
    /// 1-based queue position when not granted, 0 when granted.
    pub queue_position: usize,
}

/// Result of a promotion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PromotionStatus {
    /// The user holds an active slot.
    Granted,
    /// Still queued at `position`.
    Waiting { position: usize },
    /// Unknown to the arbiter (released or evicted).
    NotQueued,
}

/// Whether an admission entry is waiting or holding a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Queued,
    Active,
}

impl EntryState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EntryState::Queued => "queued",
            EntryState::Active => "active",
        }
    }
}

/// An entry whose client stopped heartbeating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleEntry {
    pub user_id: UserId,
    pub state: EntryState,
    /// Last heartbeat (or admission time if none arrived).
    pub last_seen: Instant,
}

/// Admission occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdmissionStatus {
    pub capacity: usize,
    pub active: usize,
    pub queued: usize,
    pub draining: bool,
}

// ============================================================================
// Session
// ============================================================================

/// Lifecycle state of one video session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Waiting for a slot.
    Queued,
    /// Slot held, conversation being provisioned.
    Connecting,
    /// Conversation live and billed.
    Connected,
    /// Provider out of quota; running unbilled with the slot held.
    DemoMode,
    /// Provisioning failed; slot already released.
    Error,
    /// Terminal.
    Ended,
}

impl SessionState {
    /// States that still count as an ongoing session for the user.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(
            self,
            SessionState::Queued
                | SessionState::Connecting
                | SessionState::Connected
                | SessionState::DemoMode
        )
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The user hung up or left the queue.
    Hangup,
    /// Credit ran out mid-session.
    BalanceExhausted,
    /// The client stopped heartbeating.
    HeartbeatTimeout,
    /// Waited in the queue longer than allowed.
    QueueTimeout,
    /// The arbiter no longer knew the user.
    Evicted,
    /// The service is shutting down.
    Shutdown,
}

impl EndReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::BalanceExhausted => "balance_exhausted",
            EndReason::HeartbeatTimeout => "heartbeat_timeout",
            EndReason::QueueTimeout => "queue_timeout",
            EndReason::Evicted => "evicted",
            EndReason::Shutdown => "shutdown",
        }
    }
}

/// Completion record produced when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub specialist_ref: String,
    /// State the session was in when it ended.
    pub final_state: SessionState,
    pub reason: EndReason,
    /// Time spent connected (or in demo mode).
    pub duration_seconds: u64,
    /// Minutes actually debited (0 for unbilled sessions). Less than the
    /// rounded-up duration when the balance ran short.
    pub billed_minutes: f64,
    /// Balance after the debit, if the ledger was reachable.
    pub balance_after: Option<f64>,
    pub rating: Option<u8>,
    pub feedback: Option<String>,
    pub ended_at: DateTime<Utc>,
}

/// Client-facing snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub specialist_ref: String,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_minutes: Option<u64>,
    pub elapsed_seconds: u64,
    pub low_balance_warning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Snapshot for the client.
    GetView {
        respond_to: oneshot::Sender<SessionView>,
    },

    /// End the session (idempotent). `effective_end` caps billed time, e.g.
    /// at the last heartbeat of an abandoned session.
    End {
        reason: EndReason,
        effective_end: Option<Instant>,
        respond_to: oneshot::Sender<SessionSummary>,
    },

    /// Attach a rating to an ended session.
    SubmitFeedback {
        rating: u8,
        comment: Option<String>,
        respond_to: oneshot::Sender<Result<SessionSummary, ScError>>,
    },
}

// ============================================================================
// Coordinator
// ============================================================================

/// Parameters for starting a session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: UserId,
    /// Which specialist the user picked.
    pub specialist_ref: String,
    /// Display name passed to the provider.
    pub user_name: String,
    /// Free-form conversational context for the specialist.
    #[serde(default)]
    pub context: String,
}

/// Messages sent to `SessionCoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    StartSession {
        request: StartSessionRequest,
        respond_to: oneshot::Sender<Result<SessionView, ScError>>,
    },

    EndSession {
        user_id: UserId,
        reason: EndReason,
        respond_to: oneshot::Sender<Result<SessionSummary, ScError>>,
    },

    GetSession {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<SessionView, ScError>>,
    },

    Heartbeat {
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), ScError>>,
    },

    SubmitFeedback {
        user_id: UserId,
        rating: u8,
        comment: Option<String>,
        respond_to: oneshot::Sender<Result<SessionSummary, ScError>>,
    },

    /// Evict entries silent for longer than `timeout`. Replies with the count.
    ExpireStale {
        timeout: Duration,
        respond_to: oneshot::Sender<usize>,
    },

    GetStatus {
        respond_to: oneshot::Sender<Result<CoordinatorStatus, ScError>>,
    },

    /// Stop admitting, end every session, then cancel children.
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Coordinator status (for health and the admission endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    /// Session actors currently supervised, including ended ones kept for their summary.
    pub sessions: usize,
    pub accepting_new: bool,
    pub mailbox_depth: usize,
    pub admission: AdmissionStatus,
}
