//! Ledger behavior over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use sc_test_utils::{user, TEST_PRICE_PER_MINUTE, TEST_USER_ALICE, TEST_USER_BOB};
use session_controller::errors::ScError;
use session_controller::ledger::{Ledger, TransactionStatus};

fn ledger() -> Ledger {
    Ledger::in_memory(TEST_PRICE_PER_MINUTE)
}

#[tokio::test]
async fn test_top_up_then_debit() {
    let ledger = ledger();
    let alice = user(TEST_USER_ALICE);

    assert!((ledger.top_up(&alice, 20.0, None).await.unwrap() - 20.0).abs() < 1e-9);
    let outcome = ledger.debit(&alice, 5.0, "Session with maya").await.unwrap();

    assert!((outcome.deducted - 5.0).abs() < 1e-9);
    assert!((outcome.balance - 15.0).abs() < 1e-9);
    assert!((ledger.balance(&alice).await.unwrap() - 15.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_debit_never_goes_negative() {
    let ledger = ledger();
    let bob = user(TEST_USER_BOB);
    ledger.top_up(&bob, 2.0, None).await.unwrap();

    let outcome = ledger.debit(&bob, 5.0, "Session with maya").await.unwrap();
    assert!((outcome.deducted - 2.0).abs() < 1e-9);
    assert!(outcome.balance.abs() < 1e-9);

    // Nothing left to take; no transaction is appended for a zero debit.
    let outcome = ledger.debit(&bob, 1.0, "Session with maya").await.unwrap();
    assert!(outcome.deducted.abs() < 1e-9);
    assert_eq!(ledger.transactions(&bob).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_concurrent_debits_across_handles_stay_consistent() {
    let ledger = ledger();
    let alice = user(TEST_USER_ALICE);
    ledger.top_up(&alice, 10.0, None).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..40 {
        let ledger = ledger.clone();
        let alice = alice.clone();
        tasks.push(tokio::spawn(async move {
            ledger.debit(&alice, 1.0, "Session with maya").await.unwrap()
        }));
    }

    let mut deducted = 0.0;
    for task in tasks {
        deducted += task.await.unwrap().deducted;
    }

    assert!((deducted - 10.0).abs() < 1e-9);
    assert!(ledger.balance(&alice).await.unwrap().abs() < 1e-9);
}

#[tokio::test]
async fn test_transactions_newest_first_with_prices() {
    let ledger = ledger();
    let alice = user(TEST_USER_ALICE);

    ledger.top_up(&alice, 10.0, None).await.unwrap();
    ledger.top_up(&alice, 30.0, Some(40.0)).await.unwrap();
    ledger.debit(&alice, 3.0, "Session with maya").await.unwrap();

    let transactions = ledger.transactions(&alice).await.unwrap();
    assert_eq!(transactions.len(), 3);

    assert!((transactions[0].amount_minutes + 3.0).abs() < 1e-9);
    assert_eq!(transactions[0].cost_dollars, None);
    assert_eq!(transactions[0].description, "Session with maya");

    assert_eq!(transactions[1].cost_dollars, Some(40.0));
    // Priced at the configured rate when no cost is given.
    assert_eq!(transactions[2].cost_dollars, Some(15.0));
    assert_eq!(transactions[2].description, "Added 10 minutes");

    assert!(transactions
        .iter()
        .all(|t| t.status == TransactionStatus::Completed));
    assert!(transactions.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
}

#[tokio::test]
async fn test_invalid_amounts_rejected() {
    let ledger = ledger();
    let alice = user(TEST_USER_ALICE);

    for minutes in [0.0, -5.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            ledger.top_up(&alice, minutes, None).await,
            Err(ScError::InvalidAmount(_))
        ));
    }
    assert!(matches!(
        ledger.top_up(&alice, 5.0, Some(-1.0)).await,
        Err(ScError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.debit(&alice, -1.0, "refund?").await,
        Err(ScError::InvalidAmount(_))
    ));
    assert!(ledger.transactions(&alice).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_user_has_zero_balance() {
    let ledger = ledger();
    assert!(ledger.balance(&user("nobody")).await.unwrap().abs() < 1e-9);
    assert!(ledger.transactions(&user("nobody")).await.unwrap().is_empty());
}
