//! Orders and payments: reservation at creation, webhook status mapping with
//! compensating stock release, settlement deduction, and payment-window
//! expiry.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use patungan::domain::aggregates::{
    DiscountTier, GroupBuyStatus, MemberStatus, OrderStatus, PaymentStatus,
};
use patungan::error::AppError;
use patungan::services::{DirectOrderInput, GroupOrderInput, OpenSessionInput};
use patungan::store::Store;

use common::{notification, wait_for, TestApp};

async fn direct_order(app: &TestApp, variant_id: uuid::Uuid, user_id: i64, qty: u32) -> patungan::services::OrderReceipt {
    app.services
        .orders
        .create_direct_order(DirectOrderInput {
            user_id,
            product_variant_id: variant_id,
            quantity: qty,
            bank_code: "bca".to_string(),
        })
        .await
        .expect("direct order")
}

#[tokio::test]
async fn direct_order_reserves_then_settlement_deducts() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;

    let receipt = direct_order(&app, variant_id, 7, 2).await;
    assert_eq!(receipt.order.status(), OrderStatus::PendingPayment);
    assert!(receipt.payment.va_number.is_some());
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (10, 2));

    app.services
        .orders
        .handle_gateway_notification(&notification(&receipt.order, "settlement"))
        .await
        .unwrap();

    let order = app.store.order(receipt.order.id()).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    let payment = app.store.payment_for_order(order.id()).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Settlement);
    assert!(payment.paid_at.is_some());

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (8, 0));
    let ledger = app.store.ledger_for(variant_id).await.unwrap();
    assert_eq!(ledger.iter().filter(|e| e.reason == "sale_commit").count(), 1);
}

#[tokio::test]
async fn settlement_replay_is_single_effect() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    let receipt = direct_order(&app, variant_id, 7, 2).await;

    let n = notification(&receipt.order, "settlement");
    app.services.orders.handle_gateway_notification(&n).await.unwrap();
    app.services.orders.handle_gateway_notification(&n).await.unwrap();

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (8, 0));
    let ledger = app.store.ledger_for(variant_id).await.unwrap();
    assert_eq!(ledger.iter().filter(|e| e.reason == "sale_commit").count(), 1);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    let receipt = direct_order(&app, variant_id, 7, 1).await;

    let mut n = notification(&receipt.order, "settlement");
    n.gross_amount = "1.00".to_string(); // signature no longer matches
    let err = app.services.orders.handle_gateway_notification(&n).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidSignature));

    let order = app.store.order(receipt.order.id()).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::PendingPayment);
}

#[tokio::test]
async fn expire_webhook_releases_reservation() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    let receipt = direct_order(&app, variant_id, 7, 3).await;

    app.services
        .orders
        .handle_gateway_notification(&notification(&receipt.order, "expire"))
        .await
        .unwrap();

    let order = app.store.order(receipt.order.id()).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Expired);
    let payment = app.store.payment_for_order(order.id()).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Expire);
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (10, 0));
}

#[tokio::test]
async fn cancel_and_deny_map_to_cancelled() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;

    for status in ["cancel", "deny"] {
        let receipt = direct_order(&app, variant_id, 7, 1).await;
        app.services
            .orders
            .handle_gateway_notification(&notification(&receipt.order, status))
            .await
            .unwrap();
        let order = app.store.order(receipt.order.id()).await.unwrap().unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (10, 0));
}

#[tokio::test]
async fn unknown_status_is_acked_without_effect() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    let receipt = direct_order(&app, variant_id, 7, 1).await;

    app.services
        .orders
        .handle_gateway_notification(&notification(&receipt.order, "refund"))
        .await
        .unwrap();
    let order = app.store.order(receipt.order.id()).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::PendingPayment);
}

#[tokio::test]
async fn payment_window_expiry_task_releases_and_cancels_gateway() {
    let app = TestApp::with_ttls(Duration::milliseconds(60), Duration::hours(1));
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    let receipt = direct_order(&app, variant_id, 7, 2).await;

    let workers = app.spawn_workers(2);
    wait_for(StdDuration::from_secs(2), || {
        let store = app.store.clone();
        let id = receipt.order.id();
        async move { store.order(id).await.unwrap().unwrap().status() == OrderStatus::Expired }
    })
    .await;
    workers.shutdown_and_join().await;

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (10, 0));
    let cancelled = app.gateway.cancelled.lock().await;
    assert!(cancelled.contains(&receipt.order.order_number().to_string()));
}

#[tokio::test]
async fn gateway_charge_failure_cancels_order_and_releases() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    app.gateway.fail_charges.store(true, Ordering::SeqCst);

    let err = app
        .services
        .orders
        .create_direct_order(DirectOrderInput {
            user_id: 7,
            product_variant_id: variant_id,
            quantity: 2,
            bank_code: "bca".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Gateway(_)));

    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (10, 0));
    let (orders, total) = app.store.orders_for_user(7, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(orders[0].status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn insufficient_stock_rejects_direct_order() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 100_000, 2).await;

    let err = app
        .services
        .orders
        .create_direct_order(DirectOrderInput {
            user_id: 7,
            product_variant_id: variant_id,
            quantity: 3,
            bank_code: "bca".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientStock));
}

async fn group_fixture(app: &TestApp, committed: u32) -> (uuid::Uuid, uuid::Uuid, String) {
    let variant_id = app.seed_variant(1, 100_000, 20).await;
    let session = app
        .services
        .groupbuy
        .open_session(OpenSessionInput {
            seller_id: 1,
            product_variant_id: variant_id,
            committed_quantity: committed,
            min_participants: 2,
            max_participants: 10,
            tiers: vec![
                DiscountTier { min_participants: 2, discount_bps: 500 },
                DiscountTier { min_participants: 5, discount_bps: 1000 },
            ],
            expires_at: Utc::now() + Duration::hours(2),
        })
        .await
        .unwrap();
    let group = app
        .services
        .groupbuy
        .organize_group(session.id(), 100, "bulk run")
        .await
        .unwrap();
    (variant_id, session.id(), group.code().as_str().to_string())
}

#[tokio::test]
async fn group_order_applies_tier_and_draws_on_session_reservation() {
    let app = TestApp::new();
    let (variant_id, session_id, code) = group_fixture(&app, 10).await;

    // Three participants unlock the 5% tier.
    app.services.groupbuy.join_group(&code, 101).await.unwrap();
    app.services.groupbuy.join_group(&code, 102).await.unwrap();
    let (group, _, _) = app.services.groupbuy.group_by_code(&code).await.unwrap();

    let receipt = app
        .services
        .orders
        .create_group_order(GroupOrderInput {
            user_id: 101,
            buyer_group_session_id: group.id(),
            bank_code: "bni".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(receipt.order.discount_bps(), 500);
    assert_eq!(receipt.order.quantity(), 1);
    assert_eq!(receipt.order.total_amount(), 95_000);

    // No reservation beyond the session's committed quantity.
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (20, 10));

    app.services
        .orders
        .handle_gateway_notification(&notification(&receipt.order, "settlement"))
        .await
        .unwrap();

    // Settlement consumed one committed unit.
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (19, 9));
    let session = app.store.session(session_id).await.unwrap().unwrap();
    assert_eq!(session.units_sold(), 1);

    // The paying member is marked paid.
    let (_, _, members) = app.services.groupbuy.group_by_code(&code).await.unwrap();
    let member = members.iter().find(|m| m.user_id == 101).unwrap();
    assert_eq!(member.status, MemberStatus::Paid);
    assert_eq!(member.order_id, Some(receipt.order.id()));

    // Finalization releases only the unsold remainder.
    app.services.groupbuy.end_session(session_id).await.unwrap();
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (19, 0));
    let session = app.store.session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status(), GroupBuyStatus::Completed);
}

#[tokio::test]
async fn non_member_cannot_place_group_order() {
    let app = TestApp::new();
    let (_, _, code) = group_fixture(&app, 10).await;
    let (group, _, _) = app.services.groupbuy.group_by_code(&code).await.unwrap();

    let err = app
        .services
        .orders
        .create_group_order(GroupOrderInput {
            user_id: 999,
            buyer_group_session_id: group.id(),
            bank_code: "bca".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn settlement_after_finalization_reholds_from_open_pool() {
    let app = TestApp::new();
    let (variant_id, session_id, code) = group_fixture(&app, 10).await;
    let (group, _, _) = app.services.groupbuy.group_by_code(&code).await.unwrap();

    let receipt = app
        .services
        .orders
        .create_group_order(GroupOrderInput {
            user_id: 100,
            buyer_group_session_id: group.id(),
            bank_code: "bca".to_string(),
        })
        .await
        .unwrap();

    // Session finalizes first: all ten committed units are released.
    app.services.groupbuy.end_session(session_id).await.unwrap();
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (20, 0));

    // The late settlement re-holds one unit and then deducts it.
    app.services
        .orders
        .handle_gateway_notification(&notification(&receipt.order, "settlement"))
        .await
        .unwrap();
    let order = app.store.order(receipt.order.id()).await.unwrap().unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (19, 0));
}

#[tokio::test]
async fn group_order_expiry_leaves_session_reservation_alone() {
    let app = TestApp::new();
    let (variant_id, _, code) = group_fixture(&app, 10).await;
    let (group, _, _) = app.services.groupbuy.group_by_code(&code).await.unwrap();

    let receipt = app
        .services
        .orders
        .create_group_order(GroupOrderInput {
            user_id: 100,
            buyer_group_session_id: group.id(),
            bank_code: "bca".to_string(),
        })
        .await
        .unwrap();

    app.services
        .orders
        .handle_gateway_notification(&notification(&receipt.order, "expire"))
        .await
        .unwrap();

    // The unit stays in the session's committed pool until finalization.
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (20, 10));
}

#[tokio::test]
async fn concurrent_settlements_agree_on_stock() {
    let app = TestApp::new();
    let variant_id = app.seed_variant(1, 50_000, 12).await;

    let mut receipts = Vec::new();
    for user_id in 1..=3 {
        receipts.push(direct_order(&app, variant_id, user_id, 2).await);
    }
    let (_, reserved, _) = app.available(variant_id).await;
    assert_eq!(reserved, 6);

    let mut handles = Vec::new();
    for receipt in &receipts {
        let services = app.services.clone();
        let n = notification(&receipt.order, "settlement");
        handles.push(tokio::spawn(async move {
            services.orders.handle_gateway_notification(&n).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Every settlement deducted exactly once despite version contention; two
    // competitors mean at most two lost swaps, within the commit bound.
    let (on_hand, reserved, _) = app.available(variant_id).await;
    assert_eq!((on_hand, reserved), (6, 0));
    let ledger = app.store.ledger_for(variant_id).await.unwrap();
    assert_eq!(ledger.iter().filter(|e| e.reason == "sale_commit").count(), 3);
}

#[tokio::test]
async fn rearm_recovers_deadlines_after_restart() {
    let app = TestApp::with_ttls(Duration::minutes(5), Duration::hours(1));
    let variant_id = app.seed_variant(1, 100_000, 10).await;
    let session = app
        .services
        .groupbuy
        .open_session(OpenSessionInput {
            seller_id: 1,
            product_variant_id: variant_id,
            committed_quantity: 5,
            min_participants: 2,
            max_participants: 10,
            tiers: vec![],
            expires_at: Utc::now() + Duration::milliseconds(50),
        })
        .await
        .unwrap();

    // Simulate a restart: a fresh scheduler and services over the same store.
    let restarted = TestApp::restarted_from(&app);
    let armed = restarted.services.rearm_pending_tasks().await.unwrap();
    assert!(armed >= 1);

    let workers = restarted.spawn_workers(1);
    wait_for(StdDuration::from_secs(2), || {
        let store = restarted.store.clone();
        let id = session.id();
        async move { store.session(id).await.unwrap().unwrap().status() == GroupBuyStatus::Completed }
    })
    .await;
    workers.shutdown_and_join().await;
}
