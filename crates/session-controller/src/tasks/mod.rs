//! Background tasks for the session controller.
//!
//! # Tasks
//!
//! - `presence` - Sweeps admission entries whose clients stopped heartbeating

pub mod presence;

pub use presence::{start_presence_monitor, PresenceConfig};
