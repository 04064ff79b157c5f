//! Deterministic fixtures for session controller tests.

use common::types::UserId;
use metrics_exporter_prometheus::PrometheusBuilder;
use session_controller::actors::{
    ActorMetrics, AdmissionHandle, CoordinatorHandle, SessionDeps, SessionSettings,
    StartSessionRequest,
};
use session_controller::config::Config;
use session_controller::ledger::Ledger;
use session_controller::observability::HealthState;
use session_controller::provider::mock::MockConversationProvider;
use session_controller::routes::{build_routes, AppState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// User ids
pub const TEST_USER_ALICE: &str = "alice";
pub const TEST_USER_BOB: &str = "bob";
pub const TEST_USER_CAROL: &str = "carol";
pub const TEST_USER_DAVE: &str = "dave";

pub const TEST_SPECIALIST: &str = "maya";
pub const TEST_PRICE_PER_MINUTE: f64 = 1.5;
pub const TEST_AVERAGE_SESSION_MINUTES: u64 = 15;

/// Parse a fixture user id.
pub fn user(id: &str) -> UserId {
    UserId::parse(id).expect("fixture user id must be valid")
}

/// Start request for `id` with the default specialist.
pub fn start_request(id: &str) -> StartSessionRequest {
    StartSessionRequest {
        user_id: user(id),
        specialist_ref: TEST_SPECIALIST.to_string(),
        user_name: format!("{id} (test)"),
        context: String::new(),
    }
}

/// Minimal valid environment for `Config::from_vars`.
pub fn test_config_vars() -> HashMap<String, String> {
    HashMap::from([
        (
            "SC_PROVIDER_URL".to_string(),
            "http://127.0.0.1:9".to_string(),
        ),
        (
            "SC_PROVIDER_API_KEY".to_string(),
            "pk_test_do_not_use".to_string(),
        ),
        ("SC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
    ])
}

pub fn test_config() -> Config {
    Config::from_vars(&test_config_vars()).expect("fixture config must be valid")
}

/// Session timings used by the fixtures (production defaults).
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        queue_poll_interval: Duration::from_secs(3),
        max_queue_wait: Duration::from_secs(3600),
        billing_tick: Duration::from_secs(1),
        provider_max_attempts: 3,
    }
}

/// A running actor system over the in-memory ledger and a mock provider.
pub struct TestServices {
    pub coordinator: CoordinatorHandle,
    pub admission: AdmissionHandle,
    pub ledger: Ledger,
    pub provider: Arc<MockConversationProvider>,
    pub metrics: Arc<ActorMetrics>,
    pub health: Arc<HealthState>,
    root_token: CancellationToken,
}

impl TestServices {
    pub fn new(capacity: usize, provider: MockConversationProvider) -> Self {
        Self::with_settings(capacity, provider, test_settings())
    }

    pub fn with_settings(
        capacity: usize,
        provider: MockConversationProvider,
        settings: SessionSettings,
    ) -> Self {
        let root_token = CancellationToken::new();
        let provider = Arc::new(provider);
        let admission = AdmissionHandle::new(
            capacity,
            TEST_AVERAGE_SESSION_MINUTES,
            root_token.child_token(),
        );
        let ledger = Ledger::in_memory(TEST_PRICE_PER_MINUTE);
        let metrics = ActorMetrics::new();
        let coordinator = CoordinatorHandle::new(
            SessionDeps {
                admission: admission.clone(),
                ledger: ledger.clone(),
                provider: provider.clone(),
                settings,
            },
            Arc::clone(&metrics),
            root_token.child_token(),
        );

        let health = Arc::new(HealthState::new());
        health.set_ready();

        Self {
            coordinator,
            admission,
            ledger,
            provider,
            metrics,
            health,
            root_token,
        }
    }

    /// Credit `minutes` to `id`.
    pub async fn fund(&self, id: &str, minutes: f64) {
        self.ledger
            .top_up(&user(id), minutes, None)
            .await
            .expect("fixture top-up must succeed");
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            coordinator: self.coordinator.clone(),
            admission: self.admission.clone(),
            ledger: self.ledger.clone(),
        })
    }

    /// The production router wired to these services.
    ///
    /// Uses a recorder that is not installed globally, so any number of
    /// routers can coexist in one test binary.
    pub fn router(&self) -> axum::Router {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(self.app_state(), Arc::clone(&self.health), handle)
    }
}

impl Drop for TestServices {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}
