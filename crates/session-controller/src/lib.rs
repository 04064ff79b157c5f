//! Wellspring Session Controller.
//!
//! Admits users into a fixed number of concurrent video-session slots,
//! queues the rest in FIFO order, provisions conversations with the video
//! provider and bills connected time against a per-user minute ledger.
//!
//! # Architecture
//!
//! - [`actors`] - admission arbiter, session supervisor and per-user session actors
//! - [`ledger`] - minute balances and the transaction log (memory or Redis)
//! - [`provider`] - video conversation provider client and retry policy
//! - [`tasks`] - presence monitor that evicts silent clients
//! - [`handlers`] / [`routes`] - JSON HTTP API
//! - [`observability`] - Prometheus metrics and health probes
//!
//! # Configuration
//!
//! All settings come from `SC_*` environment variables; see [`config::Config`].

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod observability;
pub mod provider;
pub mod routes;
pub mod tasks;
