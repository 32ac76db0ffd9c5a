//! Design approval entity: buyer-submitted assets awaiting seller sign-off.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::catalog::ItemRef;
use crate::types::Id;

/// What the submission is tied to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesignContext {
    /// Tied to a listed variant/package.
    Product,
    /// Tied to custom specifications under negotiation; never carries a
    /// variant or package.
    Quote,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DesignStatus {
    Pending,
    Approved,
    Rejected,
    ChangesRequested,
    /// Buyer replaced the files after a changes request; back in review.
    Resubmitted,
}

impl DesignStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// States the seller can review out of.
    pub fn reviewable() -> &'static [DesignStatus] {
        &[DesignStatus::Pending, DesignStatus::Resubmitted]
    }
}

impl std::fmt::Display for DesignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Resubmitted => "resubmitted",
        };
        write!(f, "{}", s)
    }
}

/// Opaque reference to an uploaded design asset. The engine never reads
/// file bytes, only metadata and the storage URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesignFile {
    pub name: String,
    pub url: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignApproval {
    pub id: Id,
    pub conversation_id: Id,
    pub buyer_id: Id,
    pub seller_id: Id,
    pub context: DesignContext,
    /// Item scope. Quote-context approvals either omit it or reference
    /// the listing with no variant/package pinned.
    pub item: Option<ItemRef>,
    /// Explicit link to a custom-scope quote in the same conversation.
    pub quote_id: Option<Id>,
    /// Ordered as submitted.
    pub files: Vec<DesignFile>,
    pub status: DesignStatus,
    pub seller_notes: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DesignFileInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1))]
    pub url: String,
    #[validate(range(min = 1))]
    pub size_bytes: u64,
    #[validate(length(min = 1, max = 127))]
    pub mime_type: String,
}

impl DesignFileInput {
    pub fn into_file(self) -> DesignFile {
        DesignFile {
            name: self.name,
            url: self.url,
            size_bytes: self.size_bytes,
            mime_type: self.mime_type,
        }
    }
}

/// Buyer input for submitting a design for approval.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitDesignInput {
    pub context: DesignContext,
    pub item: Option<ItemRef>,
    pub quote_id: Option<Id>,
    #[validate(length(min = 1, max = 20), nested)]
    pub files: Vec<DesignFileInput>,
}
