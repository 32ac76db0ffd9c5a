//! Cart and checkout session entities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::catalog::ItemRef;
use super::order::ShippingAddress;
use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Online gateway; checkout answers with a redirect descriptor and
    /// payment confirmation arrives asynchronously via webhook.
    Gateway,
    /// Manual bank transfer; admin confirms against an uploaded slip.
    BankTransfer,
}

/// One line of a buyer's cart. Prices are NOT snapshotted here; the
/// checkout scope re-reads the variant/package or quote price so a
/// concurrent change cannot leak a stale price into an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub item: ItemRef,
    pub quantity: u32,
    /// Accepted quote this line buys against, if any.
    pub quote_id: Option<Id>,
    pub added_at: i64,
}

/// One cart per buyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub buyer_id: Id,
    pub items: Vec<CartItem>,
    pub updated_at: i64,
}

impl Cart {
    pub fn empty(buyer_id: impl Into<Id>, now: i64) -> Self {
        Self {
            buyer_id: buyer_id.into(),
            items: Vec::new(),
            updated_at: now,
        }
    }
}

/// Buyer input for adding a line to the cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CartAddInput {
    pub item: ItemRef,
    #[validate(range(min = 1, max = 9999))]
    pub quantity: u32,
    pub quote_id: Option<Id>,
}

/// Buyer input for checking out the cart.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CheckoutInput {
    pub payment_method: PaymentMethod,
    #[validate(nested)]
    pub destination: ShippingAddress,
    /// Platform bank account the buyer will transfer to (bank method).
    pub bank_account_id: Option<Id>,
}

/// The grouping of all orders/bookings created from one cart submission.
/// Consolidation uses it to gate on session completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: Id,
    pub buyer_id: Id,
    pub payment_method: PaymentMethod,
    pub order_ids: Vec<Id>,
    pub booking_ids: Vec<Id>,
    pub items_subtotal: Decimal,
    pub shipping_total: Decimal,
    pub grand_total: Decimal,
    /// Set for gateway checkouts; the webhook correlates on it.
    pub gateway_reference: Option<String>,
    pub created_at: i64,
}
