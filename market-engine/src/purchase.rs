//! Purchase requirement validator.
//!
//! Pure and read-only: callers hand it the buyer's quotes and design
//! approvals, it answers whether a purchase is currently permitted and
//! why not. Checkout re-runs it inside the write scope immediately
//! before creating each order line, never trusting an earlier UI check.

use shared::models::{
    DesignApproval, DesignStatus, ItemRef, PurchaseDecision, Quote, QuoteStatus, RequirementReason,
};
use shared::Id;

/// Gating facts about one listing, resolved by the caller.
#[derive(Debug, Clone)]
pub struct ItemGating {
    pub seller_id: Id,
    pub requires_quote: bool,
    pub requires_design: bool,
    /// The product has exactly one variant. Enables the legacy
    /// null-variant design fallback; never extended beyond that.
    pub single_config: bool,
}

/// Does a design approval's scope cover the given item scope?
///
/// Exact configuration match, custom-to-custom match, or the legacy
/// single-variant fallback (a null-variant design satisfies a concrete
/// variant iff the product has exactly one variant).
fn design_scope_matches(design: &DesignApproval, scope: &ItemRef, single_config: bool) -> bool {
    match &design.item {
        None => scope.is_custom(),
        Some(item) => {
            if item.listing_id() != scope.listing_id() {
                return false;
            }
            match (item.config_id(), scope.config_id()) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                // Compatibility shim for legacy data, see DESIGN.md
                (None, Some(_)) => single_config,
                (Some(_), None) => false,
            }
        }
    }
}

/// Newest approved design covering the scope, if any.
pub fn find_approved_design<'a>(
    designs: &'a [DesignApproval],
    scope: &ItemRef,
    single_config: bool,
) -> Option<&'a DesignApproval> {
    designs
        .iter()
        .filter(|d| d.status == DesignStatus::Approved)
        .filter(|d| design_scope_matches(d, scope, single_config))
        .max_by_key(|d| d.created_at)
}

/// Any design (approved or not) covering the scope.
fn any_design_for_scope(
    designs: &[DesignApproval],
    scope: &ItemRef,
    single_config: bool,
) -> bool {
    designs
        .iter()
        .any(|d| design_scope_matches(d, scope, single_config))
}

/// Accepted, unexpired quote covering the scope with a matching
/// quantity. Scope coverage is exact, or a custom-scope quote on the
/// same listing.
pub fn find_accepted_quote<'a>(
    quotes: &'a [Quote],
    scope: &ItemRef,
    quantity: u32,
    now: i64,
) -> Option<&'a Quote> {
    quotes
        .iter()
        .filter(|q| q.item.covers(scope))
        .filter(|q| q.effective_status(now) == QuoteStatus::Accepted)
        .find(|q| q.quantity == quantity)
}

fn quote_reason(quotes: &[Quote], scope: &ItemRef, quantity: u32, now: i64) -> RequirementReason {
    let covering: Vec<&Quote> = quotes.iter().filter(|q| q.item.covers(scope)).collect();
    if covering.is_empty() {
        return RequirementReason::QuoteRequired;
    }
    if covering
        .iter()
        .any(|q| q.effective_status(now) == QuoteStatus::Accepted && q.quantity != quantity)
    {
        return RequirementReason::QuoteQuantityMismatch;
    }
    if covering
        .iter()
        .any(|q| q.status == QuoteStatus::Accepted && q.is_past_expiry(now))
    {
        return RequirementReason::QuoteExpired;
    }
    RequirementReason::QuoteNotAccepted
}

fn design_is_approved(designs: &[DesignApproval], id: &str) -> bool {
    designs
        .iter()
        .any(|d| d.id == id && d.status == DesignStatus::Approved)
}

/// Decide whether `scope` may currently be purchased at `quantity`.
///
/// Never mutates state. `quotes` and `designs` are the buyer's records,
/// read inside the caller's transactional scope.
pub fn can_purchase(
    gating: &ItemGating,
    scope: &ItemRef,
    quantity: u32,
    quotes: &[Quote],
    designs: &[DesignApproval],
    now: i64,
) -> PurchaseDecision {
    let mut reasons = Vec::new();

    let quote_match = if gating.requires_quote {
        let found = find_accepted_quote(quotes, scope, quantity, now);
        if found.is_none() {
            reasons.push(quote_reason(quotes, scope, quantity, now));
        }
        found
    } else {
        None
    };

    if gating.requires_design {
        let scope_design = find_approved_design(designs, scope, gating.single_config);
        // A quote-linked approved design (custom specifications) also
        // satisfies the design side.
        let linked_ok = quote_match
            .and_then(|q| q.design_approval_id.as_deref())
            .map(|id| design_is_approved(designs, id))
            .unwrap_or(false);
        if scope_design.is_none() && !linked_ok {
            if any_design_for_scope(designs, scope, gating.single_config) {
                reasons.push(RequirementReason::DesignNotApproved);
            } else {
                reasons.push(RequirementReason::DesignRequired);
            }
        }
    }

    // Combined gating: the quote must itself be linked to an approved
    // design, simultaneously.
    if gating.requires_quote && gating.requires_design {
        if let Some(quote) = quote_match {
            let linked = quote
                .design_approval_id
                .as_deref()
                .map(|id| design_is_approved(designs, id))
                .unwrap_or(false);
            if !linked {
                reasons.push(RequirementReason::QuoteDesignLinkMissing);
            }
        }
    }

    if reasons.is_empty() {
        PurchaseDecision::allowed()
    } else {
        PurchaseDecision::denied(reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::{DesignContext, QuoteStatus};

    fn gating(requires_quote: bool, requires_design: bool) -> ItemGating {
        ItemGating {
            seller_id: "usr_s".into(),
            requires_quote,
            requires_design,
            single_config: false,
        }
    }

    fn scope() -> ItemRef {
        ItemRef::product("prd_1", Some("var_1".into()))
    }

    fn quote(status: QuoteStatus, quantity: u32, expires_at: Option<i64>) -> Quote {
        Quote {
            id: "qt_1".into(),
            conversation_id: "cnv_1".into(),
            buyer_id: "usr_b".into(),
            seller_id: "usr_s".into(),
            item: scope(),
            status,
            quoted_price: Some(Decimal::new(5000, 2)),
            quantity,
            expires_at,
            design_approval_id: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn design(id: &str, status: DesignStatus, item: Option<ItemRef>) -> DesignApproval {
        DesignApproval {
            id: id.into(),
            conversation_id: "cnv_1".into(),
            buyer_id: "usr_b".into(),
            seller_id: "usr_s".into(),
            context: DesignContext::Product,
            item,
            quote_id: None,
            files: Vec::new(),
            status,
            seller_notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_ungated_item_is_allowed() {
        let d = can_purchase(&gating(false, false), &scope(), 1, &[], &[], 0);
        assert!(d.allowed);
        assert!(d.reasons.is_empty());
    }

    #[test]
    fn test_quote_gated_without_quote() {
        let d = can_purchase(&gating(true, false), &scope(), 1, &[], &[], 0);
        assert!(!d.allowed);
        assert_eq!(d.reasons, vec![RequirementReason::QuoteRequired]);
    }

    #[test]
    fn test_quote_gated_with_sent_quote_only() {
        let quotes = vec![quote(QuoteStatus::Sent, 1, None)];
        let d = can_purchase(&gating(true, false), &scope(), 1, &quotes, &[], 0);
        assert_eq!(d.reasons, vec![RequirementReason::QuoteNotAccepted]);
    }

    #[test]
    fn test_quote_gated_with_expired_accepted_quote() {
        let quotes = vec![quote(QuoteStatus::Accepted, 1, Some(100))];
        let d = can_purchase(&gating(true, false), &scope(), 1, &quotes, &[], 200);
        assert_eq!(d.reasons, vec![RequirementReason::QuoteExpired]);
    }

    #[test]
    fn test_quote_gated_quantity_mismatch() {
        let quotes = vec![quote(QuoteStatus::Accepted, 2, None)];
        let d = can_purchase(&gating(true, false), &scope(), 3, &quotes, &[], 0);
        assert_eq!(d.reasons, vec![RequirementReason::QuoteQuantityMismatch]);
    }

    #[test]
    fn test_quote_gated_satisfied() {
        let quotes = vec![quote(QuoteStatus::Accepted, 2, None)];
        let d = can_purchase(&gating(true, false), &scope(), 2, &quotes, &[], 0);
        assert!(d.allowed);
    }

    #[test]
    fn test_design_gated_requires_exact_variant_match() {
        let designs = vec![design(
            "da_1",
            DesignStatus::Approved,
            Some(ItemRef::product("prd_1", Some("var_2".into()))),
        )];
        let d = can_purchase(&gating(false, true), &scope(), 1, &[], &designs, 0);
        assert_eq!(d.reasons, vec![RequirementReason::DesignRequired]);
    }

    #[test]
    fn test_design_gated_pending_design_is_not_enough() {
        let designs = vec![design("da_1", DesignStatus::Pending, Some(scope()))];
        let d = can_purchase(&gating(false, true), &scope(), 1, &[], &designs, 0);
        assert_eq!(d.reasons, vec![RequirementReason::DesignNotApproved]);
    }

    #[test]
    fn test_single_variant_fallback_accepts_null_variant_design() {
        let designs = vec![design(
            "da_1",
            DesignStatus::Approved,
            Some(ItemRef::product("prd_1", None)),
        )];
        let mut g = gating(false, true);
        // Not a single-variant product: fallback off
        let d = can_purchase(&g, &scope(), 1, &[], &designs, 0);
        assert!(!d.allowed);
        // Single-variant product: legacy fallback applies
        g.single_config = true;
        let d = can_purchase(&g, &scope(), 1, &[], &designs, 0);
        assert!(d.allowed);
    }

    #[test]
    fn test_combined_gating_requires_link() {
        let designs = vec![design("da_1", DesignStatus::Approved, Some(scope()))];
        let quotes = vec![quote(QuoteStatus::Accepted, 1, None)];
        let d = can_purchase(&gating(true, true), &scope(), 1, &quotes, &designs, 0);
        assert!(!d.allowed);
        assert_eq!(d.reasons, vec![RequirementReason::QuoteDesignLinkMissing]);

        let mut linked = quotes.clone();
        linked[0].design_approval_id = Some("da_1".into());
        let d = can_purchase(&gating(true, true), &scope(), 1, &linked, &designs, 0);
        assert!(d.allowed);
    }

    #[test]
    fn test_combined_gating_linked_custom_design_satisfies_design_side() {
        // Quote-context approved design with no scope of its own,
        // reachable only through the quote link.
        let designs = vec![design("da_9", DesignStatus::Approved, None)];
        let mut q = quote(QuoteStatus::Accepted, 1, None);
        q.design_approval_id = Some("da_9".into());
        let d = can_purchase(&gating(true, true), &scope(), 1, &[q], &designs, 0);
        assert!(d.allowed);
    }

    #[test]
    fn test_custom_scope_quote_covers_concrete_variant() {
        let mut q = quote(QuoteStatus::Accepted, 1, None);
        q.item = ItemRef::product("prd_1", None);
        let d = can_purchase(&gating(true, false), &scope(), 1, &[q], &[], 0);
        assert!(d.allowed);
    }
}
