//! Physical shipment entity, consolidated or single-order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::order::ShippingAddress;
use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentKind {
    /// Admin-grouped shipment spanning several orders of one buyer.
    Consolidated,
    /// Independent single-order shipment.
    Single,
}

/// State of the external carrier booking, decoupled from order status.
/// A failed carrier call leaves the booking pending for retry; the
/// orders are already `shipped`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CarrierStatus {
    Pending,
    Booked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Id,
    pub kind: ShipmentKind,
    pub buyer_id: Id,
    pub destination: ShippingAddress,
    pub order_ids: Vec<Id>,
    pub total_weight_grams: u64,
    /// Aggregate of the member orders' shipping costs.
    pub shipping_cost: Decimal,
    pub carrier_status: CarrierStatus,
    pub awb_id: Option<String>,
    pub label_url: Option<String>,
    pub carrier_cost: Option<Decimal>,
    pub carrier_last_error: Option<String>,
    pub override_incomplete: bool,
    pub override_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Admin input for consolidating orders into one shipment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConsolidateInput {
    #[validate(length(min = 1, max = 100))]
    pub order_ids: Vec<Id>,
    /// Ship even when sibling orders of a touched checkout session are
    /// not ready. Requires a reason, which is recorded.
    pub override_incomplete: bool,
    pub override_reason: Option<String>,
}
