//! HTTP routes for the session controller.
//!
//! Defines the Axum router and application state.

use crate::actors::{AdmissionHandle, CoordinatorHandle};
use crate::handlers;
use crate::ledger::Ledger;
use crate::observability::{health_router, HealthState};
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session supervisor; every session operation goes through it.
    pub coordinator: CoordinatorHandle,

    /// Read-only admission queries (position, wait estimate).
    pub admission: AdmissionHandle,

    pub ledger: Ledger,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/v1/sessions/...`, `/api/v1/admission/...`, `/api/v1/ledger/...`
/// - `/health` and `/ready` probes
/// - `/metrics` for Prometheus
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let api_routes = Router::new()
        .route("/api/v1/sessions", post(handlers::start_session))
        .route(
            "/api/v1/sessions/:user_id",
            get(handlers::get_session).delete(handlers::end_session),
        )
        .route(
            "/api/v1/sessions/:user_id/heartbeat",
            post(handlers::heartbeat),
        )
        .route(
            "/api/v1/sessions/:user_id/feedback",
            post(handlers::submit_feedback),
        )
        .route("/api/v1/admission", get(handlers::admission_status))
        .route(
            "/api/v1/admission/:user_id/position",
            get(handlers::queue_position),
        )
        .route("/api/v1/ledger/:user_id/top-up", post(handlers::top_up))
        .route("/api/v1/ledger/:user_id/balance", get(handlers::get_balance))
        .route(
            "/api/v1/ledger/:user_id/transactions",
            get(handlers::list_transactions),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    api_routes
        .merge(health_router(health_state))
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
