//! Design approval state machine.
//!
//! Buyers submit files, sellers sign off. The write side is a plain
//! status machine; the buyer-visible "changes requested" banner is a
//! read-side projection ([`effective_changes_requested`]) so the
//! suppression rule can never turn into a hidden extra status.

use std::sync::Arc;

use serde_json::json;

use shared::models::{
    DesignApproval, DesignContext, DesignFileInput, DesignStatus, ItemRef, SubmitDesignInput,
};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::now_millis;
use shared::{new_id, EngineError, EngineResult, Principal, Role};
use validator::Validate;

use crate::db::EntityStore;
use crate::notify::{emit, NotificationSink};

pub struct DesignManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
}

impl DesignManager {
    pub fn new(store: EntityStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Buyer submits design files for seller review.
    ///
    /// Quote-context submissions must not pin a variant/package and may
    /// link a custom-scope quote of the same conversation. Product-context
    /// submissions must pin one, unless the product has exactly one
    /// variant (legacy fallback).
    pub async fn submit(
        &self,
        principal: &Principal,
        conversation_id: &str,
        input: SubmitDesignInput,
    ) -> EngineResult<DesignApproval> {
        principal.require_role(Role::Buyer)?;
        input.validate()?;

        let now = now_millis();
        let txn = self.store.begin_write()?;

        let seller_id = match input.context {
            DesignContext::Quote => {
                if let Some(item) = &input.item {
                    if item.config_id().is_some() {
                        return Err(EngineError::validation(
                            "quote-context designs must not carry a variant or package",
                        ));
                    }
                }
                if let Some(quote_id) = &input.quote_id {
                    let quote = self.store.quote_txn(&txn, quote_id)?;
                    if quote.conversation_id != conversation_id {
                        return Err(EngineError::validation(
                            "linked quote belongs to a different conversation",
                        ));
                    }
                    if !quote.item.is_custom() {
                        return Err(EngineError::validation(
                            "linked quote must be a custom-scope quote",
                        ));
                    }
                    quote.seller_id
                } else if let Some(item) = &input.item {
                    self.store.gating_for_item_txn(&txn, item)?.seller_id
                } else {
                    return Err(EngineError::validation(
                        "quote-context design needs a quote or an item to anchor the seller",
                    ));
                }
            }
            DesignContext::Product => {
                let item = input.item.as_ref().ok_or_else(|| {
                    EngineError::validation("product-context design requires an item")
                })?;
                if input.quote_id.is_some() {
                    return Err(EngineError::validation(
                        "product-context designs cannot link a quote",
                    ));
                }
                let gating = self.store.gating_for_item_txn(&txn, item)?;
                if item.config_id().is_none() && !gating.single_config {
                    return Err(EngineError::validation(
                        "product-context design requires a variant or package",
                    ));
                }
                gating.seller_id
            }
        };

        let design = DesignApproval {
            id: new_id("da"),
            conversation_id: conversation_id.to_string(),
            buyer_id: principal.id.clone(),
            seller_id: seller_id.clone(),
            context: input.context,
            item: input.item,
            quote_id: input.quote_id,
            files: input.files.into_iter().map(DesignFileInput::into_file).collect(),
            status: DesignStatus::Pending,
            seller_notes: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_design(&txn, &design)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                seller_id,
                NotificationKind::DesignSubmitted,
                "Design submitted",
                format!("A buyer submitted {} file(s) for review", design.files.len()),
                json!({ "design_approval_id": design.id, "conversation_id": conversation_id }),
            ),
        )
        .await;
        Ok(design)
    }

    /// Seller approves. Terminal.
    pub async fn approve(
        &self,
        principal: &Principal,
        design_id: &str,
        notes: Option<String>,
    ) -> EngineResult<DesignApproval> {
        self.review(principal, design_id, DesignStatus::Approved, notes, "approve")
            .await
    }

    /// Seller rejects. Terminal.
    pub async fn reject(
        &self,
        principal: &Principal,
        design_id: &str,
        notes: Option<String>,
    ) -> EngineResult<DesignApproval> {
        self.review(principal, design_id, DesignStatus::Rejected, notes, "reject")
            .await
    }

    /// Seller requests changes; buyer may resubmit.
    pub async fn request_changes(
        &self,
        principal: &Principal,
        design_id: &str,
        notes: Option<String>,
    ) -> EngineResult<DesignApproval> {
        self.review(
            principal,
            design_id,
            DesignStatus::ChangesRequested,
            notes,
            "request changes",
        )
        .await
    }

    async fn review(
        &self,
        principal: &Principal,
        design_id: &str,
        decision: DesignStatus,
        notes: Option<String>,
        action: &'static str,
    ) -> EngineResult<DesignApproval> {
        principal.require_role(Role::Seller)?;

        let txn = self.store.begin_write()?;
        let mut design = self.store.design_txn(&txn, design_id)?;
        principal.require_self(&design.seller_id, "design approval")?;

        if !DesignStatus::reviewable().contains(&design.status) {
            return Err(EngineError::InvalidTransition {
                entity: "design approval",
                id: design.id,
                action,
                current: design.status.to_string(),
                allowed: DesignStatus::reviewable()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            });
        }

        design.status = decision;
        design.seller_notes = notes;
        design.updated_at = now_millis();
        self.store.put_design(&txn, &design)?;
        self.store.commit(txn)?;

        let (kind, title) = match decision {
            DesignStatus::Approved => (NotificationKind::DesignApproved, "Design approved"),
            DesignStatus::Rejected => (NotificationKind::DesignRejected, "Design rejected"),
            _ => (
                NotificationKind::DesignChangesRequested,
                "Changes requested",
            ),
        };
        emit(
            &self.sink,
            NotificationEvent::new(
                design.buyer_id.clone(),
                kind,
                title,
                format!("The seller reviewed design {}", design.id),
                json!({ "design_approval_id": design.id }),
            ),
        )
        .await;
        Ok(design)
    }

    /// Buyer replaces the file list after a changes request; the record
    /// re-enters seller review.
    pub async fn resubmit(
        &self,
        principal: &Principal,
        design_id: &str,
        files: Vec<DesignFileInput>,
    ) -> EngineResult<DesignApproval> {
        principal.require_role(Role::Buyer)?;
        if files.is_empty() {
            return Err(EngineError::validation("resubmission requires at least one file"));
        }
        for file in &files {
            file.validate()?;
        }

        let txn = self.store.begin_write()?;
        let mut design = self.store.design_txn(&txn, design_id)?;
        principal.require_self(&design.buyer_id, "design approval")?;

        if design.status != DesignStatus::ChangesRequested {
            return Err(EngineError::InvalidTransition {
                entity: "design approval",
                id: design.id,
                action: "resubmit",
                current: design.status.to_string(),
                allowed: vec![DesignStatus::ChangesRequested.to_string()],
            });
        }

        design.files = files.into_iter().map(DesignFileInput::into_file).collect();
        design.status = DesignStatus::Resubmitted;
        design.updated_at = now_millis();
        self.store.put_design(&txn, &design)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                design.seller_id.clone(),
                NotificationKind::DesignResubmitted,
                "Design resubmitted",
                format!("The buyer resubmitted design {}", design.id),
                json!({ "design_approval_id": design.id }),
            ),
        )
        .await;
        Ok(design)
    }

    /// Copy an approved design to another variant/package of the same
    /// seller's catalog, as a new independent approved record.
    pub async fn copy_to_target(
        &self,
        principal: &Principal,
        source_id: &str,
        target: ItemRef,
    ) -> EngineResult<DesignApproval> {
        principal.require_role(Role::Seller)?;
        if target.config_id().is_none() {
            return Err(EngineError::validation(
                "copy target must be a concrete variant or package",
            ));
        }

        let now = now_millis();
        let txn = self.store.begin_write()?;
        let source = self.store.design_txn(&txn, source_id)?;
        principal.require_self(&source.seller_id, "design approval")?;

        if source.status != DesignStatus::Approved {
            return Err(EngineError::InvalidTransition {
                entity: "design approval",
                id: source.id,
                action: "copy",
                current: source.status.to_string(),
                allowed: vec![DesignStatus::Approved.to_string()],
            });
        }

        let target_gating = self.store.gating_for_item_txn(&txn, &target)?;
        if target_gating.seller_id != source.seller_id {
            return Err(EngineError::CrossSellerCopy);
        }

        let copy = DesignApproval {
            id: new_id("da"),
            conversation_id: source.conversation_id.clone(),
            buyer_id: source.buyer_id.clone(),
            seller_id: source.seller_id.clone(),
            context: DesignContext::Product,
            item: Some(target),
            quote_id: None,
            files: source.files.clone(),
            status: DesignStatus::Approved,
            seller_notes: source.seller_notes.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.put_design(&txn, &copy)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                copy.buyer_id.clone(),
                NotificationKind::DesignApproved,
                "Design approved",
                format!("An approved design now covers {:?}", copy.item.as_ref().map(|i| i.listing_id())),
                json!({ "design_approval_id": copy.id, "copied_from": source.id }),
            ),
        )
        .await;
        Ok(copy)
    }

    /// Read-side banner projection for a conversation: the
    /// changes-requested records the buyer should still see.
    pub fn changes_requested_banner(
        &self,
        conversation_id: &str,
    ) -> EngineResult<Vec<DesignApproval>> {
        let designs = self.store.designs_for_conversation(conversation_id)?;
        Ok(effective_changes_requested(&designs)
            .into_iter()
            .cloned()
            .collect())
    }
}

/// Changes-requested records not superseded by a newer submission in
/// review for the same scope. Stored status stays the source of truth;
/// this is purely a read-side projection (compare creation timestamps,
/// not status alone).
pub fn effective_changes_requested(designs: &[DesignApproval]) -> Vec<&DesignApproval> {
    designs
        .iter()
        .filter(|d| d.status == DesignStatus::ChangesRequested)
        .filter(|d| {
            !designs.iter().any(|newer| {
                newer.id != d.id
                    && newer.item == d.item
                    && newer.created_at > d.created_at
                    && matches!(
                        newer.status,
                        DesignStatus::Pending | DesignStatus::Resubmitted
                    )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemorySink;
    use crate::testutil::{seed_product, store_with_users};

    fn manager(store: &EntityStore, sink: &Arc<MemorySink>) -> DesignManager {
        DesignManager::new(store.clone(), sink.clone() as Arc<dyn NotificationSink>)
    }

    fn file(name: &str) -> DesignFileInput {
        DesignFileInput {
            name: name.into(),
            url: format!("https://files.example.com/{}", name),
            size_bytes: 2048,
            mime_type: "image/png".into(),
        }
    }

    fn product_submission(item: ItemRef) -> SubmitDesignInput {
        SubmitDesignInput {
            context: DesignContext::Product,
            item: Some(item),
            quote_id: None,
            files: vec![file("front.png")],
        }
    }

    #[tokio::test]
    async fn test_submit_and_approve() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, variant_id) = seed_product(&store, "usr_seller", false, true);
        let item = ItemRef::product(product_id, Some(variant_id));

        let submitted = designs
            .submit(
                &Principal::buyer("usr_buyer"),
                "cnv_1",
                product_submission(item),
            )
            .await
            .unwrap();
        assert_eq!(submitted.status, DesignStatus::Pending);
        assert_eq!(submitted.seller_id, "usr_seller");

        let approved = designs
            .approve(&Principal::seller("usr_seller"), &submitted.id, None)
            .await
            .unwrap();
        assert_eq!(approved.status, DesignStatus::Approved);
        assert_eq!(sink.count_of(NotificationKind::DesignApproved), 1);
    }

    #[tokio::test]
    async fn test_quote_context_forbids_variant() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, variant_id) = seed_product(&store, "usr_seller", true, true);

        let err = designs
            .submit(
                &Principal::buyer("usr_buyer"),
                "cnv_1",
                SubmitDesignInput {
                    context: DesignContext::Quote,
                    item: Some(ItemRef::product(product_id, Some(variant_id))),
                    quote_id: None,
                    files: vec![file("sketch.png")],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_product_context_requires_variant_for_multi_variant() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, _variant_id) = seed_product(&store, "usr_seller", false, true);

        let err = designs
            .submit(
                &Principal::buyer("usr_buyer"),
                "cnv_1",
                product_submission(ItemRef::product(product_id, None)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_review_guards_terminal_states() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, variant_id) = seed_product(&store, "usr_seller", false, true);
        let item = ItemRef::product(product_id, Some(variant_id));

        let submitted = designs
            .submit(&Principal::buyer("usr_buyer"), "cnv_1", product_submission(item))
            .await
            .unwrap();
        designs
            .reject(&Principal::seller("usr_seller"), &submitted.id, None)
            .await
            .unwrap();

        let err = designs
            .approve(&Principal::seller("usr_seller"), &submitted.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_resubmit_after_changes_requested() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, variant_id) = seed_product(&store, "usr_seller", false, true);
        let item = ItemRef::product(product_id, Some(variant_id));

        let submitted = designs
            .submit(&Principal::buyer("usr_buyer"), "cnv_1", product_submission(item))
            .await
            .unwrap();
        designs
            .request_changes(
                &Principal::seller("usr_seller"),
                &submitted.id,
                Some("thicker lines".into()),
            )
            .await
            .unwrap();
        assert_eq!(designs.changes_requested_banner("cnv_1").unwrap().len(), 1);

        let resubmitted = designs
            .resubmit(
                &Principal::buyer("usr_buyer"),
                &submitted.id,
                vec![file("front_v2.png")],
            )
            .await
            .unwrap();
        assert_eq!(resubmitted.status, DesignStatus::Resubmitted);
        assert_eq!(resubmitted.files[0].name, "front_v2.png");
        // Back in review: the banner is gone
        assert!(designs.changes_requested_banner("cnv_1").unwrap().is_empty());

        // Back in review: seller can approve now
        let approved = designs
            .approve(&Principal::seller("usr_seller"), &submitted.id, None)
            .await
            .unwrap();
        assert_eq!(approved.status, DesignStatus::Approved);
    }

    #[tokio::test]
    async fn test_copy_to_target_same_seller() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, variant_id) = seed_product(&store, "usr_seller", false, true);
        let item = ItemRef::product(product_id.clone(), Some(variant_id));

        let submitted = designs
            .submit(&Principal::buyer("usr_buyer"), "cnv_1", product_submission(item))
            .await
            .unwrap();
        designs
            .approve(&Principal::seller("usr_seller"), &submitted.id, None)
            .await
            .unwrap();

        // Sibling variant of the same product
        let sibling = store
            .variants_for_product(&product_id)
            .unwrap()
            .into_iter()
            .find(|v| v.name == "Large")
            .unwrap();
        let copy = designs
            .copy_to_target(
                &Principal::seller("usr_seller"),
                &submitted.id,
                ItemRef::product(product_id, Some(sibling.id)),
            )
            .await
            .unwrap();
        assert_eq!(copy.status, DesignStatus::Approved);
        assert_ne!(copy.id, submitted.id);
        assert_eq!(copy.files, store.design(&submitted.id).unwrap().files);
    }

    #[tokio::test]
    async fn test_copy_across_sellers_fails() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let designs = manager(&store, &sink);
        let (product_id, variant_id) = seed_product(&store, "usr_seller", false, true);
        let (other_product, other_variant) = seed_product(&store, "usr_other", false, true);
        let item = ItemRef::product(product_id, Some(variant_id));

        let submitted = designs
            .submit(&Principal::buyer("usr_buyer"), "cnv_1", product_submission(item))
            .await
            .unwrap();
        designs
            .approve(&Principal::seller("usr_seller"), &submitted.id, None)
            .await
            .unwrap();

        let err = designs
            .copy_to_target(
                &Principal::seller("usr_seller"),
                &submitted.id,
                ItemRef::product(other_product, Some(other_variant)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CrossSellerCopy));
    }

    #[test]
    fn test_banner_suppressed_by_newer_submission() {
        let mk = |id: &str, status: DesignStatus, created_at: i64| DesignApproval {
            id: id.into(),
            conversation_id: "cnv_1".into(),
            buyer_id: "usr_buyer".into(),
            seller_id: "usr_seller".into(),
            context: DesignContext::Product,
            item: Some(ItemRef::product("prd_1", Some("var_1".into()))),
            quote_id: None,
            files: Vec::new(),
            status,
            seller_notes: None,
            created_at,
            updated_at: created_at,
        };

        // Changes requested, nothing newer: banner shows
        let designs = vec![mk("da_1", DesignStatus::ChangesRequested, 100)];
        assert_eq!(effective_changes_requested(&designs).len(), 1);

        // A newer pending submission for the same scope suppresses it
        let designs = vec![
            mk("da_1", DesignStatus::ChangesRequested, 100),
            mk("da_2", DesignStatus::Pending, 200),
        ];
        assert!(effective_changes_requested(&designs).is_empty());

        // A newer submission for a DIFFERENT scope does not
        let mut other = mk("da_3", DesignStatus::Pending, 300);
        other.item = Some(ItemRef::product("prd_1", Some("var_2".into())));
        let designs = vec![mk("da_1", DesignStatus::ChangesRequested, 100), other];
        assert_eq!(effective_changes_requested(&designs).len(), 1);
    }
}
