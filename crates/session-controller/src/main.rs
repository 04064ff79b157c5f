//! Session Controller
//!
//! HTTP service that admits users into a fixed number of concurrent video
//! sessions, queues the rest and bills connected time.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Select the ledger store (Redis when `SC_REDIS_URL` is set, else memory)
//! 4. Build the video provider client
//! 5. Start the actor system (`AdmissionActor`, `SessionCoordinatorActor`)
//! 6. Start the presence monitor
//! 7. Serve the HTTP API until SIGTERM/SIGINT, then drain sessions

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::secret::ExposeSecret;
use session_controller::actors::{
    ActorMetrics, AdmissionHandle, CoordinatorHandle, SessionDeps, SessionSettings,
};
use session_controller::config::Config;
use session_controller::ledger::{InMemoryLedgerStore, Ledger, LedgerStore, RedisLedgerStore};
use session_controller::observability::{init_metrics_recorder, HealthState};
use session_controller::provider::{ConversationProvider, HttpConversationProvider};
use session_controller::routes::{self, AppState};
use session_controller::tasks::{start_presence_monitor, PresenceConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for background tasks after the server stops.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_controller=debug,sc=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        max_concurrent_capacity = config.max_concurrent_capacity,
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        provider_url = %config.provider_url,
        ledger_backend = if config.redis_url.is_some() { "redis" } else { "memory" },
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let store: Arc<dyn LedgerStore> = match &config.redis_url {
        Some(redis_url) => {
            info!("Connecting to Redis...");
            let store = RedisLedgerStore::connect(redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?;
            info!("Redis connection established");
            Arc::new(store)
        }
        None => {
            warn!("SC_REDIS_URL not set, ledger is in-memory and will not survive restarts");
            Arc::new(InMemoryLedgerStore::new())
        }
    };
    let ledger = Ledger::new(store, config.price_per_minute);

    let provider: Arc<dyn ConversationProvider> = Arc::new(
        HttpConversationProvider::new(&config.provider_url, config.provider_api_key.clone())
            .map_err(|e| {
                error!(error = %e, "Failed to create provider client");
                e
            })?,
    );

    // Actor system
    info!("Initializing actor system...");
    let root_token = CancellationToken::new();
    let actor_metrics = ActorMetrics::new();

    let admission = AdmissionHandle::new(
        config.max_concurrent_capacity,
        config.average_session_minutes,
        root_token.child_token(),
    );
    let coordinator = CoordinatorHandle::new(
        SessionDeps {
            admission: admission.clone(),
            ledger: ledger.clone(),
            provider,
            settings: SessionSettings::from_config(&config),
        },
        Arc::clone(&actor_metrics),
        root_token.child_token(),
    );
    info!("Actor system initialized");

    let presence_task = tokio::spawn(start_presence_monitor(
        coordinator.clone(),
        PresenceConfig::from_config(&config),
        root_token.child_token(),
    ));

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        admission,
        ledger,
    });
    let app = routes::build_routes(state, Arc::clone(&health_state), prometheus_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    health_state.set_ready();
    info!("Session Controller listening on {}", addr);

    let drain_health = Arc::clone(&health_state);
    let drain_coordinator = coordinator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, draining sessions");
            drain_health.set_not_ready();
            if let Err(e) = drain_coordinator.shutdown().await {
                error!(error = %e, "Coordinator shutdown failed");
            }
        })
        .await?;

    root_token.cancel();
    if tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, presence_task)
        .await
        .is_err()
    {
        warn!("Presence monitor did not stop in time");
    }

    info!(
        actor_panics = actor_metrics.panic_count(),
        "Session Controller shutdown complete"
    );

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
