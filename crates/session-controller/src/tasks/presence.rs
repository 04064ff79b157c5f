//! Presence monitor background task.
//!
//! Every `sweep_interval` the monitor asks the coordinator to evict entries
//! whose last heartbeat is older than `heartbeat_timeout`. Active entries go
//! through the normal end-of-session path and are billed up to their last
//! heartbeat; queued entries just lose their place.
//!
//! # Graceful Shutdown
//!
//! When the cancellation token fires the task finishes its current sweep and
//! exits.

use crate::actors::CoordinatorHandle;
use crate::config::Config;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Presence monitor settings.
#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// Time between sweeps.
    pub sweep_interval: Duration,
    /// Silence after which an entry is evicted.
    pub heartbeat_timeout: Duration,
}

impl PresenceConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_interval: config.sweep_interval,
            heartbeat_timeout: config.heartbeat_timeout,
        }
    }
}

/// Run the presence monitor until `cancel_token` is cancelled.
#[instrument(skip_all, name = "sc.task.presence")]
pub async fn start_presence_monitor(
    coordinator: CoordinatorHandle,
    config: PresenceConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sc.task.presence",
        sweep_interval_secs = config.sweep_interval.as_secs(),
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        "Starting presence monitor"
    );

    let mut interval = tokio::time::interval(config.sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can be stale yet.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep(&coordinator, config.heartbeat_timeout).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "sc.task.presence",
                    "Presence monitor received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "sc.task.presence", "Presence monitor stopped");
}

/// Run a single sweep. Returns the number of evicted entries.
pub(crate) async fn sweep(coordinator: &CoordinatorHandle, heartbeat_timeout: Duration) -> usize {
    match coordinator.expire_stale(heartbeat_timeout).await {
        Ok(count) => {
            if count > 0 {
                info!(
                    target: "sc.task.presence",
                    evicted = count,
                    "Evicted stale entries"
                );
            }
            count
        }
        Err(e) => {
            error!(
                target: "sc.task.presence",
                error = %e,
                "Presence sweep failed"
            );
            0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{
        ActorMetrics, AdmissionHandle, SessionDeps, SessionSettings, SessionState,
        StartSessionRequest,
    };
    use crate::ledger::Ledger;
    use crate::provider::mock::MockConversationProvider;
    use common::types::UserId;
    use std::sync::Arc;

    fn setup() -> (CoordinatorHandle, AdmissionHandle, Ledger) {
        let root = CancellationToken::new();
        let admission = AdmissionHandle::new(1, 15, root.child_token());
        let ledger = Ledger::in_memory(1.5);
        let deps = SessionDeps {
            admission: admission.clone(),
            ledger: ledger.clone(),
            provider: Arc::new(MockConversationProvider::succeeding()),
            settings: SessionSettings {
                queue_poll_interval: Duration::from_secs(3),
                max_queue_wait: Duration::from_secs(3600),
                billing_tick: Duration::from_secs(1),
                provider_max_attempts: 1,
            },
        };
        let coordinator = CoordinatorHandle::new(deps, ActorMetrics::new(), root.child_token());
        (coordinator, admission, ledger)
    }

    fn config() -> PresenceConfig {
        PresenceConfig {
            sweep_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_stale() {
        let (coordinator, _, _) = setup();
        assert_eq!(sweep(&coordinator, Duration::from_secs(60)).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_evicts_silent_session() {
        let (coordinator, admission, ledger) = setup();
        let user = UserId::parse("silent").unwrap();
        ledger.top_up(&user, 10.0, None).await.unwrap();
        coordinator
            .start_session(StartSessionRequest {
                user_id: user.clone(),
                specialist_ref: "maya".to_string(),
                user_name: "Sam".to_string(),
                context: String::new(),
            })
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(start_presence_monitor(
            coordinator.clone(),
            config(),
            cancel.clone(),
        ));

        // No heartbeat ever arrives, so a sweep past the 60s timeout evicts.
        tokio::time::sleep(Duration::from_secs(95)).await;

        let view = coordinator.session_view(user).await.unwrap();
        assert_eq!(view.state, SessionState::Ended);
        assert_eq!(admission.status().await.unwrap().active, 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_on_cancel() {
        let (coordinator, _, _) = setup();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(start_presence_monitor(coordinator, config(), cancel.clone()));

        cancel.cancel();
        task.await.unwrap();
    }
}
