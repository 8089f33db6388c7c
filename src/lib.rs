//! Storefront order engine.
//!
//! Stock reservation, flash-sale quotas, checkout, cancellation and payment
//! reconciliation behind an axum HTTP API.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::Request,
    routing::{get, post, put},
    Router,
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Upper bound for a whole HTTP request, gateway round-trip included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

pub fn api_v1_routes() -> Router<AppState> {
    let buyer = Router::new()
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/shipping/cost", get(handlers::shipping::shipping_cost))
        .route("/cart", get(handlers::carts::get_cart))
        .route("/cart/items", post(handlers::carts::add_item))
        .route(
            "/cart/items/:id",
            put(handlers::carts::update_item).delete(handlers::carts::remove_item),
        )
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:invoice", get(handlers::orders::get_order))
        .route(
            "/orders/:invoice/cancel",
            post(handlers::orders::cancel_order),
        );

    let admin = Router::new()
        .route("/admin/orders", get(handlers::admin::list_orders))
        .route(
            "/admin/orders/:invoice/status",
            put(handlers::admin::update_order_status),
        )
        .route(
            "/admin/flash-sales",
            post(handlers::admin::create_flash_sale),
        )
        .route(
            "/admin/items/:item_id/variants/restock",
            post(handlers::admin::restock_item),
        );

    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route(
            "/flash-sales/active",
            get(handlers::flash_sales::active_flash_sale),
        )
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        );

    Router::new().merge(buyer).merge(admin).merge(public)
}

/// Full application router with request tracing and request ids.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        let request_id = request
                            .headers()
                            .get("x-request-id")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %request_id,
                        )
                    }),
                )
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}
