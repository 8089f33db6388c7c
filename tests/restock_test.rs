mod common;

use assert_matches::assert_matches;
use common::{checkout_request, TestContext};
use rust_decimal_macros::dec;
use storefront_api::{
    errors::ServiceError,
    services::restock::{RestockLine, RestockRequest},
};
use uuid::Uuid;

fn restock_request(size: &str, lines: &[(&str, i32)]) -> RestockRequest {
    RestockRequest {
        size: size.to_string(),
        variants: lines
            .iter()
            .map(|(color, stock)| RestockLine {
                color: color.to_string(),
                stock: *stock,
            })
            .collect(),
    }
}

#[tokio::test]
async fn tops_up_existing_variants_and_creates_new_ones() {
    let ctx = TestContext::new().await;
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let black = ctx.seed_variant(item.id, "M", "Black", 2).await;

    let restocked = ctx
        .services
        .restock
        .restock(
            item.id,
            restock_request("m", &[("black", 3), ("Navy", 4), ("BLACK", 1)]),
        )
        .await
        .unwrap();

    assert_eq!(restocked.len(), 2);
    let topped = restocked.iter().find(|v| v.variant_id == black.id).unwrap();
    assert!(!topped.created);
    assert_eq!(topped.stock, 6);
    assert_eq!(topped.color, "Black");
    let navy = restocked.iter().find(|v| v.created).unwrap();
    assert_eq!(navy.size, "M");
    assert_eq!(navy.color, "Navy");
    assert_eq!(navy.stock, 4);

    assert_eq!(ctx.variant(black.id).await.stock, 6);
    assert_eq!(ctx.variant(navy.variant_id).await.stock, 4);
}

#[tokio::test]
async fn restocked_units_can_be_sold() {
    let ctx = TestContext::new().await;
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "L", "White", 0).await;

    let err = ctx
        .services
        .checkout
        .checkout(Uuid::new_v4(), checkout_request(vec![(variant.id, 1)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    ctx.services
        .restock
        .restock(item.id, restock_request("L", &[("White", 1)]))
        .await
        .unwrap();
    ctx.services
        .checkout
        .checkout(Uuid::new_v4(), checkout_request(vec![(variant.id, 1)]))
        .await
        .unwrap();
    assert_eq!(ctx.variant(variant.id).await.stock, 0);
}

#[tokio::test]
async fn rejects_bad_deliveries() {
    let ctx = TestContext::new().await;
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", i32::MAX).await;

    assert_matches!(
        ctx.services
            .restock
            .restock(Uuid::new_v4(), restock_request("M", &[("Black", 1)]))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ctx.services
            .restock
            .restock(item.id, restock_request("M", &[("Black", 0)]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ctx.services
            .restock
            .restock(item.id, restock_request("M", &[]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        ctx.services
            .restock
            .restock(item.id, restock_request("M", &[("Black", 1)]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(ctx.variant(variant.id).await.stock, i32::MAX);
}
