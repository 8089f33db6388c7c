// Counters and pricing
pub mod pricing;
pub mod quota_tracker;
pub mod restock;
pub mod stock_ledger;

// External collaborators
pub mod payment_gateway;
pub mod shipping;

// Order lifecycle
pub mod cancellation;
pub mod checkout;
pub mod order_status;
pub mod payment_reconciler;

// Flash sales
pub mod flash_sale_scheduler;
pub mod flash_sales;

// Buyer-facing reads and baskets
pub mod carts;
pub mod orders;
