//! Group-buy session lifecycle: reservation at open, capacity-guarded joins,
//! and exactly-once finalization driven by the expiry task.

mod common;

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use patungan::domain::aggregates::{BuyerGroupStatus, DiscountTier, GroupBuyStatus, JoinOutcome};
use patungan::error::AppError;
use patungan::services::{EndOutcome, OpenSessionInput};
use patungan::store::Store;

use common::{wait_for, TestApp};

fn session_input(
    seller_id: i64,
    variant_id: uuid::Uuid,
    committed: u32,
    max_participants: u32,
    expires_in: Duration,
) -> OpenSessionInput {
    OpenSessionInput {
        seller_id,
        product_variant_id: variant_id,
        committed_quantity: committed,
        min_participants: 2,
        max_participants,
        tiers: vec![
            DiscountTier { min_participants: 2, discount_bps: 500 },
            DiscountTier { min_participants: 5, discount_bps: 1000 },
        ],
        expires_at: Utc::now() + expires_in,
    }
}

#[tokio::test]
async fn open_session_reserves_committed_stock() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;

    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 15, 10, Duration::hours(2)))
        .await
        .unwrap();

    assert_eq!(session.status(), GroupBuyStatus::Active);
    let (on_hand, reserved, available) = app.available(variant_id).await;
    assert_eq!(on_hand, 20);
    assert_eq!(reserved, 15);
    assert_eq!(available, 5);
}

#[tokio::test]
async fn open_session_rejects_insufficient_stock() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;

    let err = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 25, 10, Duration::hours(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock));

    // Nothing was held back.
    let (_, reserved, _) = app.available(variant_id).await;
    assert_eq!(reserved, 0);
}

#[tokio::test]
async fn expiry_task_finalizes_session_and_releases_stock() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 15, 10, Duration::milliseconds(60)))
        .await
        .unwrap();

    let workers = app.spawn_workers(2);
    wait_for(StdDuration::from_secs(2), || {
        let store = app.store.clone();
        let id = session.id();
        async move { store.session(id).await.unwrap().unwrap().status() == GroupBuyStatus::Completed }
    })
    .await;
    workers.shutdown_and_join().await;

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!(on_hand, 20);
    assert_eq!(reserved, 0);
}

#[tokio::test]
async fn finalization_is_exactly_once_under_seller_and_task_race() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 15, 10, Duration::milliseconds(80)))
        .await
        .unwrap();

    // Seller ends the session before the task fires.
    app.services
        .groupbuy
        .end_session_for_seller(session.id(), 1)
        .await
        .unwrap();
    let (_, reserved, _) = app.available(variant_id).await;
    assert_eq!(reserved, 0);

    // The task then finds the session finalized and skips.
    let workers = app.spawn_workers(1);
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    workers.shutdown_and_join().await;

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!(on_hand, 20);
    assert_eq!(reserved, 0);

    // Direct re-finalization reports the settled state.
    let outcome = app.services.groupbuy.end_session(session.id()).await.unwrap();
    assert_eq!(outcome, EndOutcome::AlreadySettled);

    // Exactly one release movement hit the ledger.
    let ledger = app.store.ledger_for(variant_id).await.unwrap();
    let releases = ledger.iter().filter(|e| e.reason == "session_release").count();
    assert_eq!(releases, 1);
}

#[tokio::test]
async fn seller_checks_are_enforced() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 5, 10, Duration::hours(2)))
        .await
        .unwrap();

    let err = app
        .services
        .groupbuy
        .cancel_session(session.id(), 99)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    app.services.groupbuy.cancel_session(session.id(), 1).await.unwrap();
    let s = app.store.session(session.id()).await.unwrap().unwrap();
    assert_eq!(s.status(), GroupBuyStatus::Cancelled);

    // Cancelling twice is a conflict for the seller.
    let err = app
        .services
        .groupbuy
        .cancel_session(session.id(), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionClosed));
}

#[tokio::test]
async fn joins_are_idempotent_and_capacity_guarded() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 10, 3, Duration::hours(2)))
        .await
        .unwrap();

    let group = app
        .services
        .groupbuy
        .organize_group(session.id(), 10, "office batch")
        .await
        .unwrap();
    let code = group.code().as_str().to_string();

    assert_eq!(
        app.services.groupbuy.join_group(&code, 11).await.unwrap(),
        JoinOutcome::Joined
    );
    // Re-join is a no-op, not an error.
    assert_eq!(
        app.services.groupbuy.join_group(&code, 11).await.unwrap(),
        JoinOutcome::AlreadyMember
    );
    assert_eq!(
        app.services.groupbuy.join_group(&code, 12).await.unwrap(),
        JoinOutcome::Joined
    );

    // Capacity 3 is now full.
    let err = app.services.groupbuy.join_group(&code, 13).await.unwrap_err();
    assert!(matches!(err, AppError::GroupFull));

    let (g, _, members) = app.services.groupbuy.group_by_code(&code).await.unwrap();
    assert_eq!(g.current_participants(), 3);
    assert_eq!(members.len(), 3);
}

#[tokio::test]
async fn concurrent_joins_cannot_overfill_a_group() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 50).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 30, 5, Duration::hours(2)))
        .await
        .unwrap();
    let group = app
        .services
        .groupbuy
        .organize_group(session.id(), 100, "rush")
        .await
        .unwrap();
    let code = group.code().as_str().to_string();

    let mut handles = Vec::new();
    for user_id in 101..=115 {
        let services = app.services.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            services.groupbuy.join_group(&code, user_id).await
        }));
    }

    let mut joined = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            joined += 1;
        }
    }

    // Organizer holds one slot; exactly four of the contenders got in.
    assert_eq!(joined, 4);
    let (g, _, members) = app.services.groupbuy.group_by_code(&code).await.unwrap();
    assert_eq!(g.current_participants(), 5);
    assert_eq!(members.len(), 5);
}

#[tokio::test]
async fn one_open_group_per_organizer() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 10, 5, Duration::hours(2)))
        .await
        .unwrap();

    app.services
        .groupbuy
        .organize_group(session.id(), 10, "first")
        .await
        .unwrap();
    let err = app
        .services
        .groupbuy
        .organize_group(session.id(), 10, "second")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::GroupAlreadyOrganized));
}

#[tokio::test]
async fn buyer_group_expires_through_task() {
    let app = TestApp::with_ttls(Duration::minutes(5), Duration::milliseconds(60));
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(session_input(1, variant_id, 10, 5, Duration::hours(2)))
        .await
        .unwrap();
    let group = app
        .services
        .groupbuy
        .organize_group(session.id(), 10, "short-lived")
        .await
        .unwrap();

    let workers = app.spawn_workers(1);
    wait_for(StdDuration::from_secs(2), || {
        let store = app.store.clone();
        let id = group.id();
        async move { store.buyer_group(id).await.unwrap().unwrap().status() == BuyerGroupStatus::Expired }
    })
    .await;
    workers.shutdown_and_join().await;

    // Joining an expired group is rejected.
    let err = app
        .services
        .groupbuy
        .join_group(group.code().as_str(), 42)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::SessionClosed));
}
