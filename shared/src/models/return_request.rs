//! Return request entity: buyer-initiated, seller-then-admin adjudicated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Requested,
    UnderReview,
    SellerApproved,
    SellerRejected,
    AdminApproved,
    AdminRejected,
    /// Refund executed against the escrow ledger.
    Refunded,
    Completed,
    Cancelled,
}

impl ReturnStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AdminRejected | Self::Completed | Self::Cancelled)
    }

    /// An active request blocks a new one for the same parent.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// States a seller response is accepted from.
    pub fn seller_respondable() -> &'static [ReturnStatus] {
        &[ReturnStatus::Requested, ReturnStatus::UnderReview]
    }

    /// States an admin resolution is accepted from.
    pub fn admin_resolvable() -> &'static [ReturnStatus] {
        &[
            ReturnStatus::SellerApproved,
            ReturnStatus::SellerRejected,
            ReturnStatus::UnderReview,
        ]
    }
}

impl std::fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::UnderReview => "under_review",
            Self::SellerApproved => "seller_approved",
            Self::SellerRejected => "seller_rejected",
            Self::AdminApproved => "admin_approved",
            Self::AdminRejected => "admin_rejected",
            Self::Refunded => "refunded",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Seller's independent recommendation; admin resolution can override it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SellerReviewStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ReturnParent {
    Order(Id),
    Booking(Id),
}

impl ReturnParent {
    pub fn parent_id(&self) -> &str {
        match self {
            Self::Order(id) | Self::Booking(id) => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequest {
    pub id: Id,
    pub parent: ReturnParent,
    pub buyer_id: Id,
    pub seller_id: Id,
    /// The escrow transaction a refund would mutate.
    pub transaction_id: Id,
    pub reason: String,
    /// Opaque evidence URLs (photos etc.); bytes live in object storage.
    pub evidence_urls: Vec<String>,
    pub status: ReturnStatus,
    pub seller_status: SellerReviewStatus,
    pub seller_proposed_amount: Option<Decimal>,
    pub seller_notes: Option<String>,
    pub requested_amount: Decimal,
    pub approved_refund_amount: Option<Decimal>,
    pub admin_notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Buyer input for opening a return.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitReturnInput {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
    #[validate(length(max = 10))]
    pub evidence_urls: Vec<String>,
    pub requested_amount: Decimal,
}
