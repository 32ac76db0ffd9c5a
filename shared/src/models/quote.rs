//! Quote entity: one custom-price negotiation per conversation scope.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::catalog::ItemRef;
use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    /// Buyer asked for a price; no price attached yet.
    Requested,
    /// Seller attached a price; waiting on the buyer.
    Sent,
    Accepted,
    Rejected,
    /// Read-time projection of a sent/accepted quote past its expiry.
    /// Never written eagerly by a background job.
    Expired,
}

impl QuoteStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Expired)
    }

    /// States a buyer decision can move out of.
    pub fn allowed_for_decision() -> &'static [QuoteStatus] {
        &[QuoteStatus::Sent]
    }
}

impl std::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Sent => "sent",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A negotiated custom price offer scoped to a buyer-seller conversation
/// and one item configuration (or the custom scope of a listing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: Id,
    pub conversation_id: Id,
    pub buyer_id: Id,
    pub seller_id: Id,
    pub item: ItemRef,
    pub status: QuoteStatus,
    /// Null until the seller sends a price.
    pub quoted_price: Option<Decimal>,
    pub quantity: u32,
    pub expires_at: Option<i64>,
    /// Set when design gating auto-linked an approved design at send time.
    pub design_approval_id: Option<Id>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Quote {
    /// Expiry is computed at read time; nobody flips quotes in the
    /// background.
    pub fn is_past_expiry(&self, now: i64) -> bool {
        self.expires_at.map_or(false, |at| now > at)
    }

    /// Status with read-time expiry applied. A sent or accepted quote
    /// past its expiry counts as expired the moment anyone observes it.
    pub fn effective_status(&self, now: i64) -> QuoteStatus {
        match self.status {
            QuoteStatus::Sent | QuoteStatus::Accepted if self.is_past_expiry(now) => {
                QuoteStatus::Expired
            }
            other => other,
        }
    }
}

/// Seller input for sending (pricing) a quote.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendQuoteInput {
    pub price: Decimal,
    #[validate(range(min = 1, max = 9999))]
    pub quantity: u32,
    /// Defaults to now + the configured validity window when unset.
    pub expires_at: Option<i64>,
}
