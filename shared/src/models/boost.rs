//! Boost purchase entity: paid listing promotion.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoostStatus {
    PendingPayment,
    Active,
    Cancelled,
}

impl std::fmt::Display for BoostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingPayment => "pending_payment",
            Self::Active => "active",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostPurchase {
    pub id: Id,
    pub seller_id: Id,
    pub product_id: Id,
    pub amount: Decimal,
    pub duration_days: u32,
    /// Window starts when payment is confirmed.
    pub starts_at: Option<i64>,
    pub ends_at: Option<i64>,
    pub status: BoostStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BoostPurchase {
    /// Whether the promotion window covers `now`. Expiry is read-time
    /// computed, like quote expiry.
    pub fn is_live(&self, now: i64) -> bool {
        self.status == BoostStatus::Active
            && self.starts_at.map_or(false, |s| now >= s)
            && self.ends_at.map_or(false, |e| now <= e)
    }
}

/// Seller input for buying promotion.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseBoostInput {
    pub product_id: Id,
    pub amount: Decimal,
    #[validate(range(min = 1, max = 90))]
    pub duration_days: u32,
    pub payment_method: super::checkout::PaymentMethod,
}
