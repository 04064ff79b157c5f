//! Metrics definitions for the Session Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded by code, never by user input:
//! - `outcome`: granted, queued, existing, draining
//! - `reason`: hangup, balance_exhausted, heartbeat_timeout, queue_timeout, provider_error, shutdown
//! - `operation`: create_conversation, end_conversation, top_up, debit, record_unbilled
//! - `class`: billing, retryable, fatal
//! - `state`: queued, active
//! - `actor_type`: admission, coordinator, session

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Provider calls are external HTTP; provisioning can take seconds
        .set_buckets_for_metric(
            Matcher::Prefix("sc_provider".to_string()),
            &[
                0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set provider latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Admission (Gauges + Counters)
// ============================================================================

/// Set the number of occupied session slots.
///
/// Metric: `sc_slots_active`
pub fn set_slots_active(count: usize) {
    // usize to f64 is exact for realistic capacities
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_slots_active").set(count as f64);
}

/// Set the number of users waiting in the queue.
///
/// Metric: `sc_queue_depth`
pub fn set_queue_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_queue_depth").set(depth as f64);
}

/// Record the outcome of a slot request.
///
/// Metric: `sc_admission_requests_total`
/// Labels: `outcome` (granted, queued, existing, draining)
pub fn record_admission_request(outcome: &'static str) {
    counter!("sc_admission_requests_total", "outcome" => outcome).increment(1);
}

// ============================================================================
// Sessions
// ============================================================================

/// Record a session reaching the ended state.
///
/// Metric: `sc_sessions_ended_total`
/// Labels: `reason`
pub fn record_session_ended(reason: &'static str) {
    counter!("sc_sessions_ended_total", "reason" => reason).increment(1);
}

/// Record a stale entry evicted by the presence sweep.
///
/// Metric: `sc_presence_evictions_total`
/// Labels: `state` (queued, active)
pub fn record_presence_eviction(state: &'static str) {
    counter!("sc_presence_evictions_total", "state" => state).increment(1);
}

// ============================================================================
// Provider
// ============================================================================

/// Record video provider call latency.
///
/// Metric: `sc_provider_latency_seconds`
/// Labels: `operation` (create_conversation, end_conversation)
pub fn record_provider_latency(operation: &'static str, duration: Duration) {
    histogram!("sc_provider_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record a classified provider failure.
///
/// Metric: `sc_provider_errors_total`
/// Labels: `class` (billing, retryable, fatal)
pub fn record_provider_error(class: &'static str) {
    counter!("sc_provider_errors_total", "class" => class).increment(1);
}

// ============================================================================
// Ledger
// ============================================================================

/// Record a ledger mutation.
///
/// Metric: `sc_ledger_operations_total`
/// Labels: `operation` (top_up, debit, record_unbilled)
pub fn record_ledger_operation(operation: &'static str) {
    counter!("sc_ledger_operations_total", "operation" => operation).increment(1);
}

// ============================================================================
// Actors
// ============================================================================

/// Set the mailbox depth for an actor type.
///
/// Metric: `sc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Record an actor panic. Any non-zero value is a bug.
///
/// Metric: `sc_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("sc_actor_panics_total", "actor_type" => actor_type).increment(1);
}
