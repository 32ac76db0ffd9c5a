//! Escrow ledger entry. Exactly one per order, booking or boost
//! purchase; the sole source of truth for money state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Awaiting payment confirmation (gateway webhook or admin).
    Pending,
    /// Buyer's money is held by the platform.
    Escrow,
    /// Paid out to the seller. Terminal.
    Released,
    /// Returned to the buyer via cancellation or return resolution. Terminal.
    Refunded,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    pub fn allowed_next(&self) -> &'static [TransactionStatus] {
        match self {
            Self::Pending => &[TransactionStatus::Escrow, TransactionStatus::Refunded],
            Self::Escrow => &[TransactionStatus::Released, TransactionStatus::Refunded],
            Self::Released | Self::Refunded => &[],
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Escrow => "escrow",
            Self::Released => "released",
            Self::Refunded => "refunded",
        };
        write!(f, "{}", s)
    }
}

/// What the money is for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TransactionParent {
    Order(Id),
    Booking(Id),
    /// Listing promotion; the platform retains the full amount.
    Boost(Id),
}

impl TransactionParent {
    pub fn parent_id(&self) -> &str {
        match self {
            Self::Order(id) | Self::Booking(id) | Self::Boost(id) => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub parent: TransactionParent,
    /// The paying user (for boosts, the seller buying promotion).
    pub buyer_id: Id,
    pub seller_id: Id,
    pub amount: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    /// Invariant: `amount == seller_payout + commission_amount`.
    pub seller_payout: Decimal,
    pub status: TransactionStatus,
    /// Gateway payment reference for webhook correlation.
    pub gateway_reference: Option<String>,
    /// Bank-transfer proof, recorded before admin confirmation.
    pub bank_account_id: Option<Id>,
    pub payment_slip_url: Option<String>,
    pub refunded_amount: Option<Decimal>,
    pub escrowed_at: Option<i64>,
    pub released_at: Option<i64>,
    pub refunded_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Transaction {
    pub fn is_boost(&self) -> bool {
        matches!(self.parent, TransactionParent::Boost(_))
    }
}
