mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::{checkout_request, signed_notification, TestContext};
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    auth::Identity,
    entities::{FlashSaleStatus, OrderStatus, PaymentStatus},
    errors::ServiceError,
    services::{
        checkout::CheckoutReceipt,
        order_status::AdminStatus,
        payment_reconciler::{PaymentNotification, ReconcileOutcome},
    },
};
use uuid::Uuid;

async fn place_order(ctx: &TestContext, stock: i32, qty: i32) -> (CheckoutReceipt, Uuid) {
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", stock).await;
    let receipt = ctx
        .services
        .checkout
        .checkout(Uuid::new_v4(), checkout_request(vec![(variant.id, qty)]))
        .await
        .unwrap();
    (receipt, variant.id)
}

async fn notify(
    ctx: &TestContext,
    receipt: &CheckoutReceipt,
    status: &str,
) -> Result<ReconcileOutcome, ServiceError> {
    let body = signed_notification(
        &receipt.order.invoice,
        status,
        &receipt.order.total_amount.to_string(),
        None,
    );
    ctx.services
        .reconciler
        .apply(PaymentNotification::from_payload(body)?)
        .await
}

#[tokio::test]
async fn settlement_is_idempotent() {
    let ctx = TestContext::new().await;
    let (receipt, variant_id) = place_order(&ctx, 5, 2).await;

    let first = notify(&ctx, &receipt, "settlement").await.unwrap();
    assert_eq!(
        first,
        ReconcileOutcome::Applied {
            order_status: OrderStatus::Processing,
            payment_status: PaymentStatus::Paid,
        }
    );

    let second = notify(&ctx, &receipt, "settlement").await.unwrap();
    assert_eq!(second, ReconcileOutcome::Unchanged);

    let order = ctx.order(&receipt.order.invoice).await;
    assert_eq!(order.status, OrderStatus::Processing);
    let payment = ctx.payment(order.id).await;
    assert_eq!(payment.payment_status, PaymentStatus::Paid);
    assert!(payment.raw_response.is_some());
    assert_eq!(ctx.variant(variant_id).await.stock, 3);
}

#[tokio::test]
async fn expiry_reverses_reservations_once() {
    let ctx = TestContext::new().await;
    let now = Utc::now();
    let item = ctx.seed_item("Sneakers", dec!(500000)).await;
    let variant = ctx.seed_variant(item.id, "42", "White", 10).await;
    let sale = ctx
        .seed_flash_sale(
            FlashSaleStatus::Active,
            now - chrono::Duration::hours(1),
            now + chrono::Duration::hours(1),
        )
        .await;
    let allocation = ctx
        .seed_allocation(sale.id, item.id, dec!(350000), 5, 0)
        .await;
    let receipt = ctx
        .services
        .checkout
        .checkout(Uuid::new_v4(), checkout_request(vec![(variant.id, 2)]))
        .await
        .unwrap();

    let outcome = notify(&ctx, &receipt, "expire").await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            order_status: OrderStatus::Cancelled,
            payment_status: PaymentStatus::Failed,
        }
    );
    assert_eq!(ctx.variant(variant.id).await.stock, 10);
    assert_eq!(ctx.allocation(allocation.id).await.sold, 0);

    assert_eq!(
        notify(&ctx, &receipt, "expire").await.unwrap(),
        ReconcileOutcome::Unchanged
    );
    assert_eq!(ctx.variant(variant.id).await.stock, 10);
    assert_eq!(ctx.allocation(allocation.id).await.sold, 0);
}

#[tokio::test]
async fn late_pending_notice_does_not_downgrade_paid() {
    let ctx = TestContext::new().await;
    let (receipt, _) = place_order(&ctx, 5, 1).await;

    notify(&ctx, &receipt, "settlement").await.unwrap();
    let outcome = notify(&ctx, &receipt, "pending").await.unwrap();

    assert_matches!(outcome, ReconcileOutcome::Ignored { .. });
    let order = ctx.order(&receipt.order.invoice).await;
    assert_eq!(order.status, OrderStatus::Processing);
    assert_eq!(ctx.payment(order.id).await.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn capture_after_expiry_is_ignored() {
    let ctx = TestContext::new().await;
    let (receipt, variant_id) = place_order(&ctx, 5, 1).await;

    notify(&ctx, &receipt, "expire").await.unwrap();
    let outcome = notify(&ctx, &receipt, "capture").await.unwrap();

    assert_matches!(outcome, ReconcileOutcome::Ignored { .. });
    let order = ctx.order(&receipt.order.invoice).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(ctx.payment(order.id).await.payment_status, PaymentStatus::Failed);
    assert_eq!(ctx.variant(variant_id).await.stock, 5);
}

#[tokio::test]
async fn capture_for_buyer_cancelled_order_records_payment_only() {
    let ctx = TestContext::new().await;
    let buyer = Identity::customer(Uuid::new_v4());
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 5).await;
    let receipt = ctx
        .services
        .checkout
        .checkout(buyer.user_id, checkout_request(vec![(variant.id, 1)]))
        .await
        .unwrap();
    ctx.services
        .cancellation
        .cancel(&receipt.order.invoice, &buyer)
        .await
        .unwrap();

    let outcome = notify(&ctx, &receipt, "settlement").await.unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            order_status: OrderStatus::Cancelled,
            payment_status: PaymentStatus::Paid,
        }
    );
    assert_eq!(ctx.variant(variant.id).await.stock, 5);
}

#[tokio::test]
async fn failure_after_delivery_is_an_illegal_transition() {
    let ctx = TestContext::new().await;
    let (receipt, _) = place_order(&ctx, 5, 1).await;
    notify(&ctx, &receipt, "settlement").await.unwrap();
    ctx.services
        .order_status
        .update_status(&receipt.order.invoice, AdminStatus::Delivered)
        .await
        .unwrap();

    let err = notify(&ctx, &receipt, "deny").await.unwrap_err();
    assert_matches!(err, ServiceError::IllegalTransition { .. });
    assert_eq!(
        ctx.order(&receipt.order.invoice).await.status,
        OrderStatus::Delivered
    );
}

#[tokio::test]
async fn challenged_capture_keeps_payment_pending() {
    let ctx = TestContext::new().await;
    let (receipt, _) = place_order(&ctx, 5, 1).await;
    let body = signed_notification(
        &receipt.order.invoice,
        "capture",
        &receipt.order.total_amount.to_string(),
        Some("challenge"),
    );

    let outcome = ctx
        .services
        .reconciler
        .apply(PaymentNotification::from_payload(body).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome, ReconcileOutcome::Unchanged);
    assert_eq!(
        ctx.order(&receipt.order.invoice).await.status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn unknown_invoice_is_not_found_and_creates_nothing() {
    let ctx = TestContext::new().await;
    let body = signed_notification("INV-20250101-GHOST1", "settlement", "10000.00", None);

    let err = ctx
        .services
        .reconciler
        .apply(PaymentNotification::from_payload(body).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::NotFound(_));
    assert_eq!(ctx.order_count().await, 0);
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let ctx = TestContext::new().await;
    let (receipt, _) = place_order(&ctx, 5, 1).await;
    let mut body = signed_notification(
        &receipt.order.invoice,
        "settlement",
        &receipt.order.total_amount.to_string(),
        None,
    );
    body["signature_key"] = json!("00ff");

    let err = ctx
        .services
        .reconciler
        .apply(PaymentNotification::from_payload(body).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Unauthorized(_));
    assert_eq!(
        ctx.order(&receipt.order.invoice).await.status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn amount_mismatch_is_rejected() {
    let ctx = TestContext::new().await;
    let (receipt, _) = place_order(&ctx, 5, 1).await;
    let body = signed_notification(&receipt.order.invoice, "settlement", "1.00", None);

    let err = ctx
        .services
        .reconciler
        .apply(PaymentNotification::from_payload(body).unwrap())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::BadRequest(_));
    assert_eq!(
        ctx.order(&receipt.order.invoice).await.status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn refund_status_is_acknowledged_without_changes() {
    let ctx = TestContext::new().await;
    let (receipt, _) = place_order(&ctx, 5, 1).await;

    let outcome = notify(&ctx, &receipt, "refund").await.unwrap();
    assert_matches!(outcome, ReconcileOutcome::Ignored { .. });
}

#[tokio::test]
async fn fractional_price_is_charged_and_settled_in_whole_units() {
    let ctx = TestContext::new().await;
    let item = ctx.seed_item("Kaos Polos", dec!(75000.50)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 3).await;

    let receipt = ctx
        .services
        .checkout
        .checkout(Uuid::new_v4(), checkout_request(vec![(variant.id, 1)]))
        .await
        .unwrap();

    assert_eq!(receipt.items[0].unit_price, dec!(75001));
    assert_eq!(receipt.order.total_amount, dec!(100001));
    let payment = ctx.payment(receipt.order.id).await;
    assert_eq!(payment.amount, dec!(100001));
    assert_eq!(ctx.gateway.session_amounts(), vec![receipt.order.total_amount]);

    let body = signed_notification(&receipt.order.invoice, "settlement", "100001.00", None);
    let outcome = ctx
        .services
        .reconciler
        .apply(PaymentNotification::from_payload(body).unwrap())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Applied {
            order_status: OrderStatus::Processing,
            payment_status: PaymentStatus::Paid,
        }
    );
}
