//! Order entity: one product line item of a checkout.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Processing,
    /// Reached only through a shipment (consolidated or single-order).
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Forward transitions, excluding cancellation (which is reachable
    /// from any non-terminal state).
    pub fn allowed_next(&self) -> &'static [OrderStatus] {
        match self {
            Self::PendingPayment => &[OrderStatus::Paid],
            Self::Paid => &[OrderStatus::Processing, OrderStatus::Shipped],
            Self::Processing => &[OrderStatus::Shipped],
            Self::Shipped => &[OrderStatus::Delivered],
            Self::Delivered | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Physical shipping destination. Consolidation requires destination
/// equality, so the whole struct derives `Eq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 120))]
    pub recipient: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 80))]
    pub city: String,
    #[validate(length(min = 1, max = 20))]
    pub postcode: String,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Id,
    pub session_id: Id,
    pub buyer_id: Id,
    pub seller_id: Id,
    pub product_id: Id,
    pub variant_id: Id,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// Always `unit_price * quantity`; shipping is tracked separately.
    pub total_amount: Decimal,
    pub shipping_cost: Decimal,
    pub shipping_weight_grams: u32,
    /// Provenance: the accepted quote this line was created from.
    pub quote_id: Option<Id>,
    pub design_approval_id: Option<Id>,
    pub status: OrderStatus,
    /// Seller-set: packed and awaiting shipment.
    pub ready_to_ship: bool,
    /// Set when the order joins a shipment (consolidated or single).
    pub shipment_id: Option<Id>,
    pub return_attempt_count: u32,
    pub destination: ShippingAddress,
    pub created_at: i64,
    pub updated_at: i64,
}
