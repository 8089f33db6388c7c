//! HTTP surface. Handlers are thin: extract, call a service, render.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cancellation::CancellationService, carts::CartService, checkout::CheckoutService,
    flash_sales::FlashSaleService, order_status::OrderStatusService, orders::OrderService,
    payment_gateway::PaymentGateway, payment_reconciler::PaymentReconciler,
    restock::RestockService, shipping::ShippingService,
};

pub mod admin;
pub mod carts;
pub mod checkout;
pub mod common;
pub mod flash_sales;
pub mod health;
pub mod orders;
pub mod payment_webhooks;
pub mod shipping;

/// Services shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub cancellation: Arc<CancellationService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub order_status: Arc<OrderStatusService>,
    pub orders: Arc<OrderService>,
    pub carts: Arc<CartService>,
    pub flash_sales: Arc<FlashSaleService>,
    pub restock: Arc<RestockService>,
    pub shipping: ShippingService,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let shipping = ShippingService::new(
            config.shipping_origin_city.clone(),
            config.shipping_fallback_cost,
        );

        let checkout = Arc::new(CheckoutService::new(
            db_pool.clone(),
            gateway.clone(),
            shipping.clone(),
            event_sender.clone(),
            config.payment_gateway_timeout(),
            config.payment_finish_redirect_url.clone(),
        ));
        let cancellation = Arc::new(CancellationService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            db_pool.clone(),
            event_sender.clone(),
            config.payment_server_key.clone(),
        ));
        let order_status = Arc::new(OrderStatusService::new(db_pool.clone(), event_sender));

        Self {
            checkout,
            cancellation,
            reconciler,
            order_status,
            orders: Arc::new(OrderService::new(db_pool.clone())),
            carts: Arc::new(CartService::new(db_pool.clone())),
            flash_sales: Arc::new(FlashSaleService::new(db_pool.clone())),
            restock: Arc::new(RestockService::new(db_pool)),
            shipping,
        }
    }
}
