//! Booking entity: one service line item of a checkout.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingPayment,
    Paid,
    /// Seller started delivering the service.
    Ongoing,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn allowed_next(&self) -> &'static [BookingStatus] {
        match self {
            Self::PendingPayment => &[BookingStatus::Paid],
            Self::Paid => &[BookingStatus::Ongoing],
            Self::Ongoing => &[BookingStatus::Completed],
            Self::Completed | Self::Cancelled => &[],
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub session_id: Id,
    pub buyer_id: Id,
    pub seller_id: Id,
    pub service_id: Id,
    pub package_id: Id,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub quote_id: Option<Id>,
    pub design_approval_id: Option<Id>,
    pub status: BookingStatus,
    pub created_at: i64,
    pub updated_at: i64,
}
