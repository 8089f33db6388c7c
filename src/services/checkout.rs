//! Checkout orchestrator.
//!
//! Cart and direct-buy checkouts are reduced to the same list of
//! `(variant, quantity)` lines before anything is locked. Everything from the
//! first lock to the payment session runs in one transaction; any failing step
//! rolls the whole reservation back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, DatabaseConnection, DatabaseTransaction, EntityTrait,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::carts::CartService;
use super::payment_gateway::{BuyerInfo, PaymentGateway, SessionHandle, SessionRequest};
use super::pricing::{whole_units, PriceResolver};
use super::quota_tracker::{LockedAllocation, QuotaTracker};
use super::shipping::ShippingService;
use super::stock_ledger::{LockedVariant, StockLedger};
use crate::entities::{item, order, order_item, payment, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

const INVOICE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const GATEWAY_NAME: &str = "midtrans";

/// `INV-YYYYMMDD-XXXXXX`
pub fn generate_invoice(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| INVOICE_ALPHABET[rng.gen_range(0..INVOICE_ALPHABET.len())] as char)
        .collect();
    format!("INV-{}-{}", now.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutLine {
    pub variant_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1))]
    pub payment_method: String,
    #[validate(length(min = 1))]
    pub full_name: String,
    #[validate(length(min = 1))]
    pub phone_number: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1))]
    pub address: String,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub province: String,
    pub postal_code: Option<String>,
    /// Direct-buy lines. Empty means "check out my cart".
    #[serde(default)]
    pub items: Vec<CheckoutLine>,
}

/// Where the checkout lines come from.
#[derive(Debug, Clone)]
pub enum CheckoutSource {
    Cart,
    Direct(Vec<CheckoutLine>),
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment_status: PaymentStatus,
    pub snap_token: String,
    pub redirect_url: Option<String>,
}

/// A line after pricing and reservation, ready to be written as an order item.
struct ReservedLine {
    item_id: Uuid,
    variant_id: Uuid,
    allocation_id: Option<Uuid>,
    quantity: i32,
    unit_price: Decimal,
}

/// Sums duplicate variants, keeping first-appearance order.
fn merge_lines(
    lines: impl IntoIterator<Item = (Uuid, i32)>,
) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    let mut merged: Vec<(Uuid, i32)> = Vec::new();
    let mut index: HashMap<Uuid, usize> = HashMap::new();
    for (variant_id, quantity) in lines {
        match index.get(&variant_id) {
            Some(&i) => {
                merged[i].1 = merged[i].1.checked_add(quantity).ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Quantity for variant {} is too large",
                        variant_id
                    ))
                })?;
            }
            None => {
                index.insert(variant_id, merged.len());
                merged.push((variant_id, quantity));
            }
        }
    }
    Ok(merged)
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    shipping: ShippingService,
    event_sender: EventSender,
    gateway_timeout: Duration,
    finish_url: Option<String>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        shipping: ShippingService,
        event_sender: EventSender,
        gateway_timeout: Duration,
        finish_url: Option<String>,
    ) -> Self {
        Self {
            db,
            gateway,
            shipping,
            event_sender,
            gateway_timeout,
            finish_url,
        }
    }

    /// Direct buy when `request.items` is non-empty, cart checkout otherwise.
    pub async fn checkout(
        &self,
        buyer_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let source = if request.items.is_empty() {
            CheckoutSource::Cart
        } else {
            CheckoutSource::Direct(request.items.clone())
        };
        self.place_order(buyer_id, request, source).await
    }

    pub async fn checkout_cart(
        &self,
        buyer_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutReceipt, ServiceError> {
        self.place_order(buyer_id, request, CheckoutSource::Cart).await
    }

    #[instrument(skip(self, request, source), fields(city = %request.city))]
    async fn place_order(
        &self,
        buyer_id: Uuid,
        request: CheckoutRequest,
        source: CheckoutSource,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let result = self.run(buyer_id, &request, &source).await;
        match &result {
            Ok(receipt) => {
                info!(
                    invoice = %receipt.order.invoice,
                    total = %receipt.order.total_amount,
                    "checkout completed"
                );
                counter!("storefront.checkout.completed", 1);
                self.event_sender
                    .publish(Event::OrderCreated {
                        order_id: receipt.order.id,
                        invoice: receipt.order.invoice.clone(),
                    })
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "checkout rejected");
                counter!("storefront.checkout.rejected", 1, "reason" => e.code());
            }
        }
        result
    }

    async fn run(
        &self,
        buyer_id: Uuid,
        request: &CheckoutRequest,
        source: &CheckoutSource,
    ) -> Result<CheckoutReceipt, ServiceError> {
        request.validate()?;
        if let CheckoutSource::Direct(lines) = source {
            for line in lines {
                line.validate()?;
            }
        }

        let now = Utc::now();
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin checkout transaction: {}", e);
            ServiceError::db_error(e)
        })?;

        let receipt = match self.reserve_and_create(&txn, buyer_id, request, source, now).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    error!("Failed to roll back checkout: {}", rollback);
                }
                return Err(e);
            }
        };

        txn.commit().await.map_err(|e| {
            error!("Failed to commit checkout {}: {}", receipt.order.invoice, e);
            ServiceError::db_error(e)
        })?;
        Ok(receipt)
    }

    async fn reserve_and_create(
        &self,
        txn: &DatabaseTransaction,
        buyer_id: Uuid,
        request: &CheckoutRequest,
        source: &CheckoutSource,
        now: DateTime<Utc>,
    ) -> Result<CheckoutReceipt, ServiceError> {
        let lines = match source {
            CheckoutSource::Direct(lines) => {
                merge_lines(lines.iter().map(|line| (line.variant_id, line.quantity)))?
            }
            CheckoutSource::Cart => {
                let lines = merge_lines(CartService::lines(txn, buyer_id).await?)?;
                if lines.is_empty() {
                    return Err(ServiceError::ValidationError("cart is empty".to_string()));
                }
                lines
            }
        };

        // variants first, ascending
        let mut variants: BTreeMap<Uuid, LockedVariant<'_>> = BTreeMap::new();
        let variant_ids: BTreeMap<Uuid, ()> = lines.iter().map(|(id, _)| (*id, ())).collect();
        for variant_id in variant_ids.into_keys() {
            variants.insert(variant_id, StockLedger::lock_variant(txn, variant_id).await?);
        }

        let mut items: HashMap<Uuid, item::Model> = HashMap::new();
        for variant in variants.values() {
            if items.contains_key(&variant.item_id()) {
                continue;
            }
            let item = item::Entity::find_by_id(variant.item_id())
                .one(txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Item {} not found", variant.item_id()))
                })?;
            items.insert(item.id, item);
        }

        // then allocations, ascending
        let mut allocation_ids: BTreeMap<Uuid, ()> = BTreeMap::new();
        for item_id in items.keys() {
            if let Some(id) = PriceResolver::candidate_allocation(txn, *item_id, now).await? {
                allocation_ids.insert(id, ());
            }
        }
        let mut allocations: BTreeMap<Uuid, LockedAllocation<'_>> = BTreeMap::new();
        for allocation_id in allocation_ids.into_keys() {
            allocations.insert(
                allocation_id,
                QuotaTracker::lock_allocation(txn, allocation_id).await?,
            );
        }

        let mut reserved = Vec::with_capacity(lines.len());
        for (variant_id, quantity) in &lines {
            let variant = variants
                .get_mut(variant_id)
                .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))?;
            let item = items.get(&variant.item_id()).ok_or_else(|| {
                ServiceError::NotFound(format!("Item {} not found", variant.item_id()))
            })?;

            let price = PriceResolver::resolve(txn, item, now).await?;
            variant.decrement(*quantity).await?;
            if let Some(allocation_id) = price.allocation_id {
                let allocation = allocations.get_mut(&allocation_id).ok_or_else(|| {
                    ServiceError::Conflict(format!(
                        "Pricing for {} changed during checkout; please retry",
                        item.name
                    ))
                })?;
                allocation.charge(*quantity).await?;
            }

            reserved.push(ReservedLine {
                item_id: item.id,
                variant_id: *variant_id,
                allocation_id: price.allocation_id,
                quantity: *quantity,
                unit_price: price.unit_price,
            });
        }
        drop(allocations);
        drop(variants);

        let shipping_cost = whole_units(self.shipping.cost(txn, &request.city).await?);
        let subtotal: Decimal = reserved
            .iter()
            .map(|line| line.unit_price * Decimal::from(line.quantity))
            .sum();
        let total_amount = subtotal + shipping_cost;

        let invoice = generate_invoice(now);
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(buyer_id),
            invoice: Set(invoice.clone()),
            status: Set(OrderStatus::Pending),
            total_amount: Set(total_amount),
            shipping_cost: Set(shipping_cost),
            receiver_name: Set(request.full_name.clone()),
            receiver_phone: Set(request.phone_number.clone()),
            address: Set(request.address.clone()),
            city: Set(request.city.clone()),
            province: Set(request.province.clone()),
            postal_code: Set(request.postal_code.clone()),
            snap_token: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut order_items = Vec::with_capacity(reserved.len());
        for line in &reserved {
            let row = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                item_id: Set(line.item_id),
                variant_id: Set(line.variant_id),
                flash_sale_item_id: Set(line.allocation_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                created_at: Set(now),
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
            order_items.push(row);
        }

        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            payment_gateway: Set(GATEWAY_NAME.to_string()),
            transaction_id: Set(invoice.clone()),
            payment_method: Set(request.payment_method.clone()),
            amount: Set(total_amount),
            payment_status: Set(PaymentStatus::Pending),
            raw_response: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let session = self
            .open_session(SessionRequest {
                invoice: invoice.clone(),
                gross_amount: total_amount,
                customer: BuyerInfo {
                    first_name: request.full_name.clone(),
                    phone: request.phone_number.clone(),
                    email: request.email.clone(),
                },
                enabled_payments: SessionRequest::enabled_payments_for(&request.payment_method),
                finish_url: self.finish_url.clone(),
            })
            .await?;

        let mut active: order::ActiveModel = order.into();
        active.snap_token = Set(Some(session.token.clone()));
        let order = active.update(txn).await.map_err(ServiceError::db_error)?;

        if matches!(source, CheckoutSource::Cart) {
            CartService::clear(txn, buyer_id).await?;
        }

        Ok(CheckoutReceipt {
            order,
            items: order_items,
            payment_status: payment.payment_status,
            snap_token: session.token,
            redirect_url: session.redirect_url,
        })
    }

    /// Requests the payment session; a slow gateway aborts the checkout.
    async fn open_session(&self, request: SessionRequest) -> Result<SessionHandle, ServiceError> {
        let invoice = request.invoice.clone();
        match tokio::time::timeout(self.gateway_timeout, self.gateway.create_session(request)).await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(%invoice, timeout = ?self.gateway_timeout, "payment session timed out");
                Err(ServiceError::GatewayUnavailable(
                    "payment gateway timed out".to_string(),
                ))
            }
        }
    }
}
