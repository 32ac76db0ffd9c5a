//! Purchase-gating decision types.

use serde::{Deserialize, Serialize};

/// Machine-readable reason a purchase is currently not permitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequirementReason {
    /// No design approval exists for the required scope.
    DesignRequired,
    /// A design exists for the scope but is not approved.
    DesignNotApproved,
    /// No quote exists for the required scope.
    QuoteRequired,
    /// A quote exists but is not in the accepted state.
    QuoteNotAccepted,
    /// The matching quote has passed its expiry.
    QuoteExpired,
    /// The accepted quote's quantity differs from the requested quantity.
    QuoteQuantityMismatch,
    /// Combined gating: the quote is not linked to the approved design.
    QuoteDesignLinkMissing,
}

/// Result of the purchase requirement validator. Read-only; computed
/// fresh inside the checkout scope, never cached from an earlier check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseDecision {
    pub allowed: bool,
    pub reasons: Vec<RequirementReason>,
}

impl PurchaseDecision {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
        }
    }

    pub fn denied(reasons: Vec<RequirementReason>) -> Self {
        Self {
            allowed: false,
            reasons,
        }
    }
}
