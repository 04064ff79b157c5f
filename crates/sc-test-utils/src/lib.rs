//! # SC Test Utilities
//!
//! Shared test utilities for the Session Controller (SC).
//!
//! This crate provides:
//! - Fixtures (`fixtures`): fixed user ids, config builders and a fully
//!   wired `TestServices` bundle backed by the in-memory ledger
//! - Server harness (`TestScServer`) for tests that need a real socket
//! - `MockConversationProvider` re-exported from the service crate
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let services = TestServices::new(2, MockConversationProvider::succeeding());
//!     services.fund(TEST_USER_ALICE, 10.0).await;
//!
//!     let view = services
//!         .coordinator
//!         .start_session(start_request(TEST_USER_ALICE))
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
pub use session_controller::provider::mock::MockConversationProvider;
