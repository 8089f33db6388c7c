#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{
        cart_item, flash_sale, flash_sale_item, item, item_variant, order, payment,
        shipping_rate, FlashSaleStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    handlers::AppServices,
    services::{
        checkout::{CheckoutLine, CheckoutRequest},
        payment_gateway::{
            CancelOutcome, PaymentGateway, RemoteStatus, SessionHandle, SessionRequest,
        },
        payment_reconciler::PaymentNotification,
    },
    AppState,
};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";
pub const SHIPPING_ORIGIN: &str = "Mojokerto";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    CreateSession(String),
    QueryStatus(String),
    Cancel(String),
}

/// Scripted stand-in for the payment gateway that records every call.
pub struct FakeGateway {
    calls: Mutex<Vec<GatewayCall>>,
    fail_sessions: AtomicBool,
    session_delay: Mutex<Option<Duration>>,
    /// `None` means the gateway has never heard of the invoice.
    remote_status: Mutex<Option<RemoteStatus>>,
    fail_cancel: AtomicBool,
    session_amounts: Mutex<Vec<Decimal>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_sessions: AtomicBool::new(false),
            session_delay: Mutex::new(None),
            remote_status: Mutex::new(Some(RemoteStatus::Pending)),
            fail_cancel: AtomicBool::new(false),
            session_amounts: Mutex::new(Vec::new()),
        }
    }
}

impl FakeGateway {
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Gross amounts requested from the gateway, in call order.
    pub fn session_amounts(&self) -> Vec<Decimal> {
        self.session_amounts.lock().unwrap().clone()
    }

    pub fn fail_sessions(&self, fail: bool) {
        self.fail_sessions.store(fail, Ordering::SeqCst);
    }

    pub fn delay_sessions(&self, delay: Duration) {
        *self.session_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_remote_status(&self, status: Option<RemoteStatus>) {
        *self.remote_status.lock().unwrap() = status;
    }

    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(&self, request: SessionRequest) -> Result<SessionHandle, ServiceError> {
        self.record(GatewayCall::CreateSession(request.invoice.clone()));
        self.session_amounts.lock().unwrap().push(request.gross_amount);
        let delay = *self.session_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable("scripted failure".into()));
        }
        Ok(SessionHandle {
            token: format!("snap-{}", request.invoice),
            redirect_url: Some(format!("https://pay.test/{}", request.invoice)),
        })
    }

    async fn query_status(&self, invoice: &str) -> Result<RemoteStatus, ServiceError> {
        self.record(GatewayCall::QueryStatus(invoice.to_string()));
        let status = self.remote_status.lock().unwrap().clone();
        status.ok_or_else(|| ServiceError::NotFound(invoice.to_string()))
    }

    async fn cancel(&self, invoice: &str) -> Result<CancelOutcome, ServiceError> {
        self.record(GatewayCall::Cancel(invoice.to_string()));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnavailable("scripted failure".into()));
        }
        Ok(CancelOutcome::Cancelled)
    }
}

/// Application services over a fresh in-memory SQLite database.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub config: AppConfig,
    pub gateway: Arc<FakeGateway>,
    pub event_sender: EventSender,
    pub services: AppServices,
    events: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.payment_server_key = Some(SERVER_KEY.to_string());
        cfg.payment_gateway_timeout_secs = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let event_sender = EventSender::new(event_tx);
        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(
            db.clone(),
            &cfg,
            gateway.clone(),
            event_sender.clone(),
        );

        Self {
            db,
            config: cfg,
            gateway,
            event_sender,
            services,
            events: event_rx,
        }
    }

    pub fn state(&self) -> AppState {
        AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            event_sender: self.event_sender.clone(),
            services: self.services.clone(),
        }
    }

    pub fn app(&self) -> Router {
        storefront_api::build_app(self.state())
    }

    /// Events published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn seed_item(&self, name: &str, price: Decimal) -> item::Model {
        let now = Utc::now();
        item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            price: Set(price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed item")
    }

    pub async fn seed_variant(
        &self,
        item_id: Uuid,
        size: &str,
        color: &str,
        stock: i32,
    ) -> item_variant::Model {
        let now = Utc::now();
        item_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            item_id: Set(item_id),
            size: Set(size.to_string()),
            color: Set(color.to_string()),
            stock: Set(stock),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed variant")
    }

    pub async fn seed_flash_sale(
        &self,
        status: FlashSaleStatus,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> flash_sale::Model {
        let now = Utc::now();
        flash_sale::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Payday Sale".to_string()),
            description: Set(String::new()),
            window_start: Set(window_start),
            window_end: Set(window_end),
            status: Set(status),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed flash sale")
    }

    pub async fn seed_allocation(
        &self,
        flash_sale_id: Uuid,
        item_id: Uuid,
        discount_price: Decimal,
        quota: i32,
        sold: i32,
    ) -> flash_sale_item::Model {
        let now = Utc::now();
        flash_sale_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            flash_sale_id: Set(flash_sale_id),
            item_id: Set(item_id),
            discount_price: Set(discount_price),
            quota: Set(quota),
            sold: Set(sold),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed allocation")
    }

    pub async fn seed_shipping_rate(&self, destination: &str, cost: Decimal) {
        shipping_rate::ActiveModel {
            id: Set(Uuid::new_v4()),
            origin_city: Set(SHIPPING_ORIGIN.to_string()),
            destination_city: Set(destination.to_string()),
            cost: Set(cost),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed shipping rate");
    }

    pub async fn variant(&self, id: Uuid) -> item_variant::Model {
        item_variant::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load variant")
            .expect("variant exists")
    }

    pub async fn allocation(&self, id: Uuid) -> flash_sale_item::Model {
        flash_sale_item::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load allocation")
            .expect("allocation exists")
    }

    pub async fn flash_sale(&self, id: Uuid) -> flash_sale::Model {
        flash_sale::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load flash sale")
            .expect("flash sale exists")
    }

    pub async fn order(&self, invoice: &str) -> order::Model {
        order::Entity::find()
            .filter(order::Column::Invoice.eq(invoice))
            .one(&*self.db)
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn payment(&self, order_id: Uuid) -> payment::Model {
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await
            .expect("load payment")
            .expect("payment exists")
    }

    pub async fn order_count(&self) -> usize {
        order::Entity::find()
            .all(&*self.db)
            .await
            .expect("load orders")
            .len()
    }

    pub async fn cart_line_count(&self) -> usize {
        cart_item::Entity::find()
            .all(&*self.db)
            .await
            .expect("load cart items")
            .len()
    }
}

pub fn checkout_request(lines: Vec<(Uuid, i32)>) -> CheckoutRequest {
    CheckoutRequest {
        payment_method: "qris".to_string(),
        full_name: "Siti Rahma".to_string(),
        phone_number: "081234567890".to_string(),
        email: Some("siti@example.com".to_string()),
        address: "Jl. Majapahit 12".to_string(),
        city: "Surabaya".to_string(),
        province: "Jawa Timur".to_string(),
        postal_code: Some("60111".to_string()),
        items: lines
            .into_iter()
            .map(|(variant_id, quantity)| CheckoutLine {
                variant_id,
                quantity,
            })
            .collect(),
    }
}

/// A gateway notification signed with [`SERVER_KEY`].
pub fn signed_notification(
    invoice: &str,
    transaction_status: &str,
    gross_amount: &str,
    fraud_status: Option<&str>,
) -> Value {
    let mut body = json!({
        "order_id": invoice,
        "transaction_status": transaction_status,
        "status_code": "200",
        "gross_amount": gross_amount,
    });
    if let Some(fraud) = fraud_status {
        body["fraud_status"] = json!(fraud);
    }
    let notification = PaymentNotification::from_payload(body.clone()).expect("valid payload");
    body["signature_key"] = json!(notification.expected_signature(SERVER_KEY));
    body
}
