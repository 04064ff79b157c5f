//! Observability for the Session Controller.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields;
//! user ids appear in logs but never in metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_slots_active` | Gauge | none | Occupied session slots |
//! | `sc_queue_depth` | Gauge | none | Users waiting for a slot |
//! | `sc_admission_requests_total` | Counter | `outcome` | Slot request outcomes |
//! | `sc_sessions_ended_total` | Counter | `reason` | Why sessions ended |
//! | `sc_provider_latency_seconds` | Histogram | `operation` | Video provider latency |
//! | `sc_provider_errors_total` | Counter | `class` | Classified provider failures |
//! | `sc_ledger_operations_total` | Counter | `operation` | Ledger mutations |
//! | `sc_presence_evictions_total` | Counter | `state` | Stale entries evicted |
//! | `sc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure per actor type |
//! | `sc_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
