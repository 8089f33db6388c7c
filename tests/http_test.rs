//! Router-level tests: identity extraction, status codes and response shapes.

mod common;

use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    response::Response,
};
use common::{signed_notification, TestContext};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::auth::{USER_ID_HEADER, USER_ROLE_HEADER};
use tower::ServiceExt;
use uuid::Uuid;

async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

fn request(method: Method, uri: &str, identity: Option<(Uuid, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, role)) = identity {
        builder = builder
            .header(USER_ID_HEADER, user_id.to_string())
            .header(USER_ROLE_HEADER, role);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

fn cost_of(quote: &Value) -> Decimal {
    quote["cost"].as_str().unwrap().parse().unwrap()
}

fn checkout_body(variant_id: Uuid, quantity: i32) -> Value {
    json!({
        "payment_method": "qris",
        "full_name": "Siti Rahma",
        "phone_number": "081234567890",
        "email": "siti@example.com",
        "address": "Jl. Majapahit 12",
        "city": "Surabaya",
        "province": "Jawa Timur",
        "postal_code": "60111",
        "items": [{ "variant_id": variant_id, "quantity": quantity }],
    })
}

#[tokio::test]
async fn health_reports_database_up() {
    let ctx = TestContext::new().await;
    let response = ctx
        .app()
        .oneshot(request(Method::GET, "/api/v1/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = response_json(response).await;
    assert_eq!(body["database"], "up");
}

#[tokio::test]
async fn buyer_routes_require_an_identity() {
    let ctx = TestContext::new().await;

    let response = ctx
        .app()
        .oneshot(request(Method::GET, "/api/v1/orders", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["code"], "unauthorized");

    let response = ctx
        .app()
        .oneshot(request(
            Method::GET,
            "/api/v1/orders",
            Some((Uuid::new_v4(), "superuser")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_reject_customers() {
    let ctx = TestContext::new().await;
    let response = ctx
        .app()
        .oneshot(request(
            Method::PUT,
            "/api/v1/admin/orders/INV-20250101-ABC123/status",
            Some((Uuid::new_v4(), "customer")),
            Some(json!({ "status": "delivered" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn checkout_then_fetch_and_cancel_over_http() {
    let ctx = TestContext::new().await;
    let buyer = Uuid::new_v4();
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 5).await;

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            "/api/v1/checkout",
            Some((buyer, "customer")),
            Some(checkout_body(variant.id, 2)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let receipt = response_json(response).await;
    let invoice = receipt["order"]["invoice"].as_str().unwrap().to_string();
    assert!(invoice.starts_with("INV-"));
    assert_eq!(receipt["payment_status"], "pending");
    assert!(receipt["snap_token"].is_string());

    let response = ctx
        .app()
        .oneshot(request(
            Method::GET,
            &format!("/api/v1/orders/{}", invoice),
            Some((buyer, "customer")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let detail = response_json(response).await;
    assert_eq!(detail["invoice"], invoice.as_str());
    assert_eq!(detail["items"].as_array().unwrap().len(), 1);

    let response = ctx
        .app()
        .oneshot(request(
            Method::GET,
            &format!("/api/v1/orders/{}", invoice),
            Some((Uuid::new_v4(), "customer")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", invoice),
            Some((buyer, "customer")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = response_json(response).await;
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(ctx.variant(variant.id).await.stock, 5);

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", invoice),
            Some((buyer, "customer")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response_json(response).await["code"], "already_cancelled");
}

#[tokio::test]
async fn oversold_checkout_is_unprocessable() {
    let ctx = TestContext::new().await;
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 1).await;

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            "/api/v1/checkout",
            Some((Uuid::new_v4(), "customer")),
            Some(checkout_body(variant.id, 2)),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["code"], "insufficient_stock");
    assert!(body["message"].as_str().unwrap().contains("Kaos Polos (M / Black)"));
}

#[tokio::test]
async fn webhook_accepts_signed_notifications() {
    let ctx = TestContext::new().await;
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 5).await;
    let receipt = ctx
        .services
        .checkout
        .checkout(Uuid::new_v4(), common::checkout_request(vec![(variant.id, 1)]))
        .await
        .unwrap();
    let body = signed_notification(
        &receipt.order.invoice,
        "settlement",
        &receipt.order.total_amount.to_string(),
        None,
    );

    let response = ctx
        .app()
        .oneshot(request(Method::POST, "/api/v1/payments/webhook", None, Some(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_json(response).await;
    assert_eq!(outcome["outcome"], "applied");
    assert_eq!(outcome["order_status"], "processing");
}

#[tokio::test]
async fn webhook_rejects_malformed_bodies() {
    let ctx = TestContext::new().await;
    let response = ctx
        .app()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/payments/webhook")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["message"], "Bad request: invalid payload");
}

#[tokio::test]
async fn shipping_cost_falls_back_for_unknown_routes() {
    let ctx = TestContext::new().await;
    ctx.seed_shipping_rate("Surabaya", dec!(12000)).await;
    let buyer = Some((Uuid::new_v4(), "customer"));

    let response = ctx
        .app()
        .oneshot(request(
            Method::GET,
            "/api/v1/shipping/cost?city=Surabaya",
            buyer,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let quote = response_json(response).await;
    assert_eq!(quote["origin_city"], "Mojokerto");
    assert_eq!(cost_of(&quote), dec!(12000));

    let response = ctx
        .app()
        .oneshot(request(
            Method::GET,
            "/api/v1/shipping/cost?city=Jayapura",
            buyer,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(cost_of(&response_json(response).await), dec!(25000));
}

#[tokio::test]
async fn admin_can_restock_and_list_orders_over_http() {
    let ctx = TestContext::new().await;
    let admin = Uuid::new_v4();
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 1).await;

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            &format!("/api/v1/admin/items/{}/variants/restock", item.id),
            Some((admin, "admin")),
            Some(json!({ "size": "M", "variants": [{ "color": "Black", "stock": 4 }] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let restocked = response_json(response).await;
    assert_eq!(restocked[0]["stock"], 5);
    assert_eq!(restocked[0]["created"], false);
    assert_eq!(ctx.variant(variant.id).await.stock, 5);

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            &format!("/api/v1/admin/items/{}/variants/restock", item.id),
            Some((Uuid::new_v4(), "customer")),
            Some(json!({ "size": "M", "variants": [{ "color": "Black", "stock": 4 }] })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            "/api/v1/checkout",
            Some((Uuid::new_v4(), "customer")),
            Some(checkout_body(variant.id, 1)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = ctx
        .app()
        .oneshot(request(
            Method::GET,
            "/api/v1/admin/orders?status=pending&per_page=5",
            Some((admin, "admin")),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = response_json(response).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["per_page"], 5);
    assert_eq!(page["orders"][0]["status"], "pending");
}

#[tokio::test]
async fn cart_lines_can_be_updated_over_http() {
    let ctx = TestContext::new().await;
    let buyer = Uuid::new_v4();
    let item = ctx.seed_item("Kaos Polos", dec!(75000)).await;
    let variant = ctx.seed_variant(item.id, "M", "Black", 5).await;

    let response = ctx
        .app()
        .oneshot(request(
            Method::POST,
            "/api/v1/cart/items",
            Some((buyer, "customer")),
            Some(json!({ "variant_id": variant.id, "quantity": 1 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let line_id = response_json(response).await["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = ctx
        .app()
        .oneshot(request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", line_id),
            Some((buyer, "customer")),
            Some(json!({ "quantity": 3 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["quantity"], 3);

    let response = ctx
        .app()
        .oneshot(request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", line_id),
            Some((buyer, "customer")),
            Some(json!({ "quantity": 9 })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
