pub mod cart;
pub mod cart_item;
pub mod flash_sale;
pub mod flash_sale_item;
pub mod item;
pub mod item_variant;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod shipping_rate;

pub use flash_sale::FlashSaleStatus;
pub use order::OrderStatus;
pub use payment::PaymentStatus;
