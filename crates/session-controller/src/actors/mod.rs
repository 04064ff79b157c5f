//! Actor model for the session controller.
//!
//! ```text
//! SessionCoordinatorActor (singleton)
//! ├── supervises N SessionActors
//! │   └── SessionActor (one per user session)
//! │       ├── polls admission while queued
//! │       ├── provisions the conversation
//! │       └── bills connected time on end
//! └── talks to AdmissionActor (singleton)
//!     └── owns slots, the FIFO queue and last-seen timestamps
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer for capacity**: every slot decision runs in `AdmissionActor`
//! - **CancellationToken propagation**: the coordinator hands child tokens to sessions
//! - **Mailbox monitoring**: depth thresholds with metrics (singletons: 100/500, sessions: 16/48)
//! - **Message passing**: all inter-actor communication via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`admission`] - `AdmissionActor`, slots and the wait queue
//! - [`coordinator`] - `SessionCoordinatorActor`, supervises sessions
//! - [`session`] - `SessionActor`, one user's session state machine
//! - [`messages`] - Message types and DTOs
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod admission;
pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod session;

// Re-export primary types
pub use admission::{estimated_wait_minutes, AdmissionHandle};
pub use coordinator::CoordinatorHandle;
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use session::{SessionActor, SessionActorHandle, SessionDeps, SessionSettings};
