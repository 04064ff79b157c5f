//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for provider API keys and store
//! URLs that may embed credentials (e.g. `redis://:password@host`).
//!
//! `SecretString` implements `Debug` with redaction, so config structs that
//! derive or hand-write `Debug` never print the value. Reading it requires an
//! explicit `expose_secret()` call.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let api_key = SecretString::from("pk_live_123");
//! assert!(!format!("{api_key:?}").contains("pk_live_123"));
//! assert_eq!(api_key.expose_secret(), "pk_live_123");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
