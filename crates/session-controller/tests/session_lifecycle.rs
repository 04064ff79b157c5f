//! Session lifecycle tests through the coordinator.
//!
//! Time-dependent tests run on a paused clock; `wait_for_state` sleeps in
//! 10ms steps so the runtime can auto-advance to pending timers.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use sc_test_utils::{
    start_request, test_settings, user, MockConversationProvider, TestServices, TEST_USER_ALICE,
    TEST_USER_BOB, TEST_USER_CAROL,
};
use session_controller::actors::{CoordinatorHandle, EndReason, SessionState, SessionView};
use session_controller::errors::ScError;
use session_controller::ledger::TransactionStatus;
use session_controller::provider::ProviderError;
use session_controller::tasks::{start_presence_monitor, PresenceConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn wait_for_state(
    coordinator: &CoordinatorHandle,
    id: &str,
    state: SessionState,
) -> SessionView {
    for _ in 0..1000 {
        let view = coordinator.session_view(user(id)).await.unwrap();
        if view.state == state {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{id} never reached {state:?}");
}

#[tokio::test]
async fn test_zero_balance_refused_before_admission() {
    let services = TestServices::new(1, MockConversationProvider::succeeding());

    let result = services
        .coordinator
        .start_session(start_request(TEST_USER_ALICE))
        .await;

    assert!(matches!(result, Err(ScError::InsufficientBalance)));
    assert_eq!(services.admission.status().await.unwrap().active, 0);
    assert_eq!(services.provider.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hangup_promotes_queued_user() {
    let services = TestServices::new(2, MockConversationProvider::succeeding());
    for id in [TEST_USER_ALICE, TEST_USER_BOB, TEST_USER_CAROL] {
        services.fund(id, 30.0).await;
    }

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    coordinator.start_session(start_request(TEST_USER_BOB)).await.unwrap();
    let carol = coordinator
        .start_session(start_request(TEST_USER_CAROL))
        .await
        .unwrap();
    assert_eq!(carol.state, SessionState::Queued);
    assert_eq!(carol.queue_position, Some(1));

    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;
    coordinator
        .end_session(user(TEST_USER_ALICE), EndReason::Hangup)
        .await
        .unwrap();

    let carol = wait_for_state(coordinator, TEST_USER_CAROL, SessionState::Connected).await;
    assert!(carol.join_url.is_some());

    let status = services.admission.status().await.unwrap();
    assert_eq!(status.active, 2);
    assert_eq!(status.queued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_presence_monitor_evicts_silent_session_and_promotes_next() {
    let services = TestServices::new(1, MockConversationProvider::succeeding());
    services.fund(TEST_USER_ALICE, 10.0).await;
    services.fund(TEST_USER_BOB, 10.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;
    coordinator.start_session(start_request(TEST_USER_BOB)).await.unwrap();

    let cancel = CancellationToken::new();
    let monitor = tokio::spawn(start_presence_monitor(
        coordinator.clone(),
        PresenceConfig {
            sweep_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        },
        cancel.clone(),
    ));

    // Bob keeps heartbeating, Alice never does.
    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(20)).await;
        coordinator.heartbeat(user(TEST_USER_BOB)).await.unwrap();
    }

    let alice = wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Ended).await;
    let summary = alice.summary.unwrap();
    assert_eq!(summary.reason, EndReason::HeartbeatTimeout);
    // No heartbeat after connecting, so nothing is billed.
    assert_eq!(summary.billed_minutes, 0.0);
    assert!((services.ledger.balance(&user(TEST_USER_ALICE)).await.unwrap() - 10.0).abs() < 1e-9);

    wait_for_state(coordinator, TEST_USER_BOB, SessionState::Connected).await;

    cancel.cancel();
    monitor.await.unwrap();
}

#[tokio::test]
async fn test_billing_error_runs_demo_mode_with_slot_held() {
    let services = TestServices::new(1, MockConversationProvider::billing_error());
    services.fund(TEST_USER_ALICE, 5.0).await;
    services.fund(TEST_USER_BOB, 5.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    let view = wait_for_state(coordinator, TEST_USER_ALICE, SessionState::DemoMode).await;
    assert!(view.join_url.is_none());

    let bob = coordinator.start_session(start_request(TEST_USER_BOB)).await.unwrap();
    assert_eq!(bob.state, SessionState::Queued);

    let summary = coordinator
        .end_session(user(TEST_USER_ALICE), EndReason::Hangup)
        .await
        .unwrap();
    assert_eq!(summary.final_state, SessionState::DemoMode);
    assert_eq!(summary.billed_minutes, 0.0);

    let transactions = services
        .ledger
        .transactions(&user(TEST_USER_ALICE))
        .await
        .unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0].status, TransactionStatus::Demo);
    assert!((services.ledger.balance(&user(TEST_USER_ALICE)).await.unwrap() - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_fatal_error_releases_slot_and_allows_retry() {
    let services = TestServices::new(
        1,
        MockConversationProvider::with_responses(vec![Err(ProviderError::Fatal(
            "bad specialist".to_string(),
        ))]),
    );
    services.fund(TEST_USER_ALICE, 5.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    let view = wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Error).await;
    assert!(view.error.is_some());
    assert_eq!(services.admission.status().await.unwrap().active, 0);

    // The script is exhausted, so the second attempt connects.
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn test_retryable_errors_are_retried_before_connecting() {
    let services = TestServices::new(
        1,
        MockConversationProvider::with_responses(vec![
            Err(ProviderError::Retryable("503".to_string())),
            Err(ProviderError::Retryable("timeout".to_string())),
        ]),
    );
    services.fund(TEST_USER_ALICE, 5.0).await;

    services
        .coordinator
        .start_session(start_request(TEST_USER_ALICE))
        .await
        .unwrap();
    wait_for_state(&services.coordinator, TEST_USER_ALICE, SessionState::Connected).await;

    assert_eq!(services.provider.create_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_balance_exhaustion_ends_session() {
    let services = TestServices::new(1, MockConversationProvider::succeeding());
    services.fund(TEST_USER_ALICE, 1.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;

    let mut warned = false;
    for _ in 0..300 {
        let view = coordinator.session_view(user(TEST_USER_ALICE)).await.unwrap();
        if view.low_balance_warning {
            warned = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(warned, "low balance warning never fired");

    tokio::time::advance(Duration::from_secs(65)).await;
    let ended = wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Ended).await;
    let summary = ended.summary.unwrap();
    assert_eq!(summary.reason, EndReason::BalanceExhausted);
    assert_eq!(summary.billed_minutes, 1.0);
    assert_eq!(summary.balance_after, Some(0.0));
    assert_eq!(services.admission.status().await.unwrap().active, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queue_wait_is_capped() {
    let mut settings = test_settings();
    settings.max_queue_wait = Duration::from_secs(10);
    let services =
        TestServices::with_settings(1, MockConversationProvider::succeeding(), settings);
    services.fund(TEST_USER_ALICE, 5.0).await;
    services.fund(TEST_USER_BOB, 5.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    coordinator.start_session(start_request(TEST_USER_BOB)).await.unwrap();

    tokio::time::advance(Duration::from_secs(13)).await;
    let bob = wait_for_state(coordinator, TEST_USER_BOB, SessionState::Ended).await;
    assert_eq!(bob.summary.unwrap().reason, EndReason::QueueTimeout);
    assert_eq!(services.admission.status().await.unwrap().queued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hangup_bills_and_ends_conversation() {
    let services = TestServices::new(1, MockConversationProvider::succeeding());
    services.fund(TEST_USER_ALICE, 10.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;

    tokio::time::advance(Duration::from_secs(150)).await;
    let summary = coordinator
        .end_session(user(TEST_USER_ALICE), EndReason::Hangup)
        .await
        .unwrap();
    assert_eq!(summary.billed_minutes, 3.0);
    assert_eq!(summary.balance_after, Some(7.0));

    // Ending again is a no-op.
    let again = coordinator
        .end_session(user(TEST_USER_ALICE), EndReason::Hangup)
        .await
        .unwrap();
    assert_eq!(again, summary);

    for _ in 0..100 {
        if !services.provider.ended_conversations().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(services.provider.ended_conversations().len(), 1);

    let rated = coordinator
        .submit_feedback(user(TEST_USER_ALICE), 5, Some("Really helped".to_string()))
        .await
        .unwrap();
    assert_eq!(rated.rating, Some(5));
}

#[tokio::test(start_paused = true)]
async fn test_promotion_on_the_capping_tick_still_connects() {
    let mut settings = test_settings();
    settings.max_queue_wait = Duration::from_secs(12);
    let services =
        TestServices::with_settings(1, MockConversationProvider::succeeding(), settings);
    services.fund(TEST_USER_ALICE, 5.0).await;
    services.fund(TEST_USER_BOB, 5.0).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;
    let bob = coordinator.start_session(start_request(TEST_USER_BOB)).await.unwrap();
    assert_eq!(bob.state, SessionState::Queued);

    // Alice leaves after the 9s poll; Bob's next poll lands on the 12s cap.
    tokio::time::advance(Duration::from_millis(10_500)).await;
    coordinator
        .end_session(user(TEST_USER_ALICE), EndReason::Hangup)
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    let bob = wait_for_state(coordinator, TEST_USER_BOB, SessionState::Connected).await;
    assert!(bob.summary.is_none());
    assert!(bob.join_url.is_some());

    let status = services.admission.status().await.unwrap();
    assert_eq!(status.active, 1);
    assert_eq!(status.queued, 0);
}

#[tokio::test(start_paused = true)]
async fn test_clamped_debit_reports_fractional_minutes() {
    let services = TestServices::new(1, MockConversationProvider::succeeding());
    services.fund(TEST_USER_ALICE, 0.5).await;

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Connected).await;

    tokio::time::advance(Duration::from_secs(35)).await;
    let ended = wait_for_state(coordinator, TEST_USER_ALICE, SessionState::Ended).await;
    let summary = ended.summary.unwrap();
    assert_eq!(summary.reason, EndReason::BalanceExhausted);
    assert!((summary.billed_minutes - 0.5).abs() < 1e-9);
    assert_eq!(summary.balance_after, Some(0.0));

    let debit = &services
        .ledger
        .transactions(&user(TEST_USER_ALICE))
        .await
        .unwrap()[0];
    assert!((debit.amount_minutes + 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_session_view_tracks_live_queue_position() {
    let mut settings = test_settings();
    settings.queue_poll_interval = Duration::from_secs(600);
    let services =
        TestServices::with_settings(1, MockConversationProvider::succeeding(), settings);
    for id in [TEST_USER_ALICE, TEST_USER_BOB, TEST_USER_CAROL] {
        services.fund(id, 10.0).await;
    }

    let coordinator = &services.coordinator;
    coordinator.start_session(start_request(TEST_USER_ALICE)).await.unwrap();
    coordinator.start_session(start_request(TEST_USER_BOB)).await.unwrap();
    let carol = coordinator
        .start_session(start_request(TEST_USER_CAROL))
        .await
        .unwrap();
    assert_eq!(carol.queue_position, Some(2));

    // Bob leaves the queue long before Carol's next poll.
    coordinator
        .end_session(user(TEST_USER_BOB), EndReason::Hangup)
        .await
        .unwrap();

    let carol = coordinator.session_view(user(TEST_USER_CAROL)).await.unwrap();
    assert_eq!(carol.state, SessionState::Queued);
    assert_eq!(carol.queue_position, Some(1));
    assert_eq!(carol.estimated_wait_minutes, Some(0));
    assert_eq!(
        services.admission.position(user(TEST_USER_CAROL)).await.unwrap(),
        1
    );
}
