//! Integration tests for the purchase / callback / refund lifecycle.
//!
//! Exercised against in-memory SQLite with a scripted gateway double, so
//! every ledger and entitlement transition is observed for real.

mod common;

use assert_matches::assert_matches;
use common::TestContext;
use lingopay_api::{
    catalog::Level,
    entities::order::PaymentStatus,
    errors::ServiceError,
    services::orders::CallbackOutcome,
};
use std::sync::atomic::Ordering;

const TX_ID: i64 = 9_001;
const A1_PRICE: i64 = 40_000;

#[tokio::test]
async fn checkout_creates_pending_order_and_returns_hosted_url() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    let url = ctx
        .orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");

    assert!(url.starts_with("https://gateway.test/unifiedcheckout/?publicKey=pk_test"));
    assert!(url.contains("clientSecret=cs_test_1"));

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Pending);
    assert_eq!(order.amount_cents, A1_PRICE);
    assert_eq!(order.currency, "EGP");
    assert_eq!(order.gateway_order_ref.as_deref(), Some("700001"));
    assert_eq!(order.external_payment_id, None);
}

#[tokio::test]
async fn successful_callback_completes_order_and_grants_entitlement() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");

    let callback = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email);
    let outcome = ctx.orders.handle_callback(callback).await.expect("callback");
    assert_eq!(outcome, CallbackOutcome::Processed { success: true });

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Completed);
    assert_eq!(order.external_payment_id.as_deref(), Some("9001"));

    assert!(ctx
        .entitlements
        .has_entitlement(user.id, Level::LevelA1)
        .await
        .expect("entitlement query"));
}

#[tokio::test]
async fn failed_callback_marks_order_failed_without_entitlement() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");

    let callback = ctx.signed_callback(TX_ID, false, A1_PRICE, "700001", &user.email);
    let outcome = ctx.orders.handle_callback(callback).await.expect("callback");
    assert_eq!(outcome, CallbackOutcome::Processed { success: false });

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Failed);
    assert_eq!(order.external_payment_id.as_deref(), Some("9001"));

    assert!(!ctx
        .entitlements
        .has_entitlement(user.id, Level::LevelA1)
        .await
        .expect("entitlement query"));
}

#[tokio::test]
async fn redelivered_callback_is_a_noop_with_a_single_entitlement() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");

    let callback = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email);
    ctx.orders
        .handle_callback(callback.clone())
        .await
        .expect("first delivery");

    let second = ctx.orders.handle_callback(callback).await.expect("second delivery");
    assert_eq!(second, CallbackOutcome::AlreadyHandled);

    assert_eq!(ctx.entitlement_count(user.id).await, 1);
    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn tampered_or_unsigned_callback_mutates_nothing() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");

    // Plausible fields, forged tag.
    let mut tampered = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email);
    tampered.hmac = Some("0".repeat(64));
    let result = ctx.orders.handle_callback(tampered).await;
    assert_matches!(result, Err(ServiceError::InvalidSignature));

    let mut unsigned = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email);
    unsigned.hmac = None;
    let result = ctx.orders.handle_callback(unsigned).await;
    assert_matches!(result, Err(ServiceError::InvalidSignature));

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Pending);
    assert_eq!(order.external_payment_id, None);
    assert_eq!(ctx.entitlement_count(user.id).await, 0);
}

#[tokio::test]
async fn owned_level_cannot_be_bought_again_and_gateway_is_not_called() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");
    let callback = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email);
    ctx.orders.handle_callback(callback).await.expect("callback");

    let result = ctx
        .orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await;
    assert_matches!(result, Err(ServiceError::AlreadyOwned(_)));
    assert_eq!(ctx.gateway.intention_count(), 1);
}

#[tokio::test]
async fn reattempt_overwrites_the_pending_row_and_latest_attempt_wins() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("first attempt");
    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("second attempt");

    // One row per (user, level); the re-attempt replaced the intention.
    assert_eq!(ctx.order_count(user.id).await, 1);
    assert_eq!(ctx.gateway.intention_count(), 2);
    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.gateway_order_ref.as_deref(), Some("700002"));
    assert_eq!(order.status, PaymentStatus::Pending);

    // A callback for the superseded intention no longer matches.
    let stale = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email);
    let result = ctx.orders.handle_callback(stale).await;
    assert_matches!(result, Err(ServiceError::NoMatchingOrder(_)));

    // The current intention completes normally.
    let fresh = ctx.signed_callback(TX_ID + 1, true, A1_PRICE, "700002", &user.email);
    ctx.orders.handle_callback(fresh).await.expect("callback");
    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Completed);
}

#[tokio::test]
async fn gateway_rejection_leaves_no_ledger_row() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;
    ctx.gateway.fail_intention.store(true, Ordering::SeqCst);

    let result = ctx
        .orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await;
    assert_matches!(result, Err(ServiceError::GatewayRejected(_)));
    assert_eq!(ctx.order_count(user.id).await, 0);
}

#[tokio::test]
async fn callback_for_unknown_buyer_or_unknown_order_is_rejected() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    // Properly signed, but nobody has that email.
    let callback = ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", "ghost@example.com");
    let result = ctx.orders.handle_callback(callback).await;
    assert_matches!(result, Err(ServiceError::UnknownUser(_)));

    // Known buyer, but no order was ever opened.
    let callback = ctx.signed_callback(TX_ID, true, A1_PRICE, "700999", &user.email);
    let result = ctx.orders.handle_callback(callback).await;
    assert_matches!(result, Err(ServiceError::NoMatchingOrder(_)));
    assert_eq!(ctx.entitlement_count(user.id).await, 0);
}

#[tokio::test]
async fn callback_amount_mismatch_does_not_resolve_the_order() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");

    // Validly signed by the gateway, but for a different amount than the
    // pending attempt.
    let callback = ctx.signed_callback(TX_ID, true, A1_PRICE - 1, "700001", &user.email);
    let result = ctx.orders.handle_callback(callback).await;
    assert_matches!(result, Err(ServiceError::NoMatchingOrder(_)));

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Pending);
    assert_eq!(ctx.entitlement_count(user.id).await, 0);
}

#[tokio::test]
async fn refund_within_window_flips_status_and_revokes_only_that_entitlement() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    // Own two levels.
    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout A1");
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email))
        .await
        .expect("callback A1");
    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA2)
        .await
        .expect("checkout A2");
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID + 1, true, A1_PRICE, "700002", &user.email))
        .await
        .expect("callback A2");

    let outcome = ctx.orders.refund_order("9001").await.expect("refund");
    assert!(outcome.success);
    assert_eq!(ctx.gateway.refund_count(), 1);

    let refunded = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert!(!ctx
        .entitlements
        .has_entitlement(user.id, Level::LevelA1)
        .await
        .expect("entitlement query"));

    // The sibling purchase is untouched.
    let untouched = ctx.order_for(user.id, Level::LevelA2).await;
    assert_eq!(untouched.status, PaymentStatus::Completed);
    assert!(ctx
        .entitlements
        .has_entitlement(user.id, Level::LevelA2)
        .await
        .expect("entitlement query"));
}

#[tokio::test]
async fn refund_outside_window_fails_without_calling_the_gateway() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email))
        .await
        .expect("callback");

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    ctx.backdate_order(order.id, 20).await;

    let result = ctx.orders.refund_order("9001").await;
    assert_matches!(result, Err(ServiceError::RefundWindowExpired));
    assert_eq!(ctx.gateway.refund_count(), 0);

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Completed);
    assert!(ctx
        .entitlements
        .has_entitlement(user.id, Level::LevelA1)
        .await
        .expect("entitlement query"));
}

#[tokio::test]
async fn declined_refund_leaves_order_completed_and_entitlement_intact() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email))
        .await
        .expect("callback");

    ctx.gateway.refund_success.store(false, Ordering::SeqCst);
    let outcome = ctx.orders.refund_order("9001").await.expect("refund call");
    assert!(!outcome.success);

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Completed);
    assert!(ctx
        .entitlements
        .has_entitlement(user.id, Level::LevelA1)
        .await
        .expect("entitlement query"));
}

#[tokio::test]
async fn only_completed_orders_are_refundable() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    // Unknown transaction id.
    let result = ctx.orders.refund_order("424242").await;
    assert_matches!(result, Err(ServiceError::OrderNotFound(_)));

    // A failed payment has a transaction id but is not refundable.
    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID, false, A1_PRICE, "700001", &user.email))
        .await
        .expect("callback");

    let result = ctx.orders.refund_order("9001").await;
    assert_matches!(result, Err(ServiceError::NotRefundable(_)));
    assert_eq!(ctx.gateway.refund_count(), 0);
}

#[tokio::test]
async fn refunded_level_can_be_bought_again() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("checkout");
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID, true, A1_PRICE, "700001", &user.email))
        .await
        .expect("callback");
    ctx.orders.refund_order("9001").await.expect("refund");

    // The pair is free again; a new attempt reuses the row.
    let url = ctx
        .orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelA1)
        .await
        .expect("repurchase");
    assert!(url.contains("clientSecret=cs_test_2"));

    let order = ctx.order_for(user.id, Level::LevelA1).await;
    assert_eq!(order.status, PaymentStatus::Pending);
    assert_eq!(order.external_payment_id, None);
    assert_eq!(ctx.order_count(user.id).await, 1);
}

#[tokio::test]
async fn entitlement_guard_distinguishes_access_denied() {
    let ctx = TestContext::new().await;
    let user = ctx.seed_user("nour@example.com").await;

    let result = ctx
        .entitlements
        .ensure_entitlement(user.id, Level::LevelB1)
        .await;
    assert_matches!(result, Err(ServiceError::AccessDenied(_)));

    ctx.orders
        .process_order(user.id, TestContext::billing_for(&user), Level::LevelB1)
        .await
        .expect("checkout");
    let price = 55_000;
    ctx.orders
        .handle_callback(ctx.signed_callback(TX_ID, true, price, "700001", &user.email))
        .await
        .expect("callback");

    ctx.entitlements
        .ensure_entitlement(user.id, Level::LevelB1)
        .await
        .expect("access granted after purchase");

    let owned = ctx.entitlements.owned_levels(user.id).await.expect("owned levels");
    assert_eq!(owned, vec![Level::LevelB1]);
}
