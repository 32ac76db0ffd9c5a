//! Quote state machine.
//!
//! One negotiation per (conversation, item scope): a later quote for the
//! same scope updates the outstanding requested row in place instead of
//! creating a duplicate. Expiry is computed at read time; the loser of a
//! race on a sent quote gets an invalid-transition error from the
//! status guard, not a deadlock.

use std::sync::Arc;

use serde_json::json;

use shared::models::{ItemRef, Quote, QuoteStatus, RequirementReason, SendQuoteInput};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::{millis_after_days, now_millis};
use shared::{new_id, EngineError, EngineResult, Principal, Role};
use validator::Validate;

use crate::config::EngineConfig;
use crate::db::EntityStore;
use crate::money;
use crate::notify::{emit, NotificationSink};
use crate::purchase::find_approved_design;

pub struct QuoteManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl QuoteManager {
    pub fn new(store: EntityStore, sink: Arc<dyn NotificationSink>, config: EngineConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// Buyer asks for a custom price. Creates a `requested` quote with no
    /// price, or refreshes the outstanding requested one for the scope.
    pub async fn request_quote(
        &self,
        principal: &Principal,
        conversation_id: &str,
        item: ItemRef,
        quantity: u32,
    ) -> EngineResult<Quote> {
        principal.require_role(Role::Buyer)?;
        if quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }

        let now = now_millis();
        let txn = self.store.begin_write()?;
        let gating = self.store.gating_for_item_txn(&txn, &item)?;
        let seller_id = gating.seller_id.clone();

        let existing = self
            .store
            .quotes_for_conversation_txn(&txn, conversation_id)?
            .into_iter()
            .find(|q| q.item == item && q.status == QuoteStatus::Requested);

        let quote = match existing {
            Some(mut quote) => {
                // One row per negotiation: refresh in place
                quote.quantity = quantity;
                quote.updated_at = now;
                quote
            }
            None => Quote {
                id: new_id("qt"),
                conversation_id: conversation_id.to_string(),
                buyer_id: principal.id.clone(),
                seller_id: seller_id.clone(),
                item,
                status: QuoteStatus::Requested,
                quoted_price: None,
                quantity,
                expires_at: None,
                design_approval_id: None,
                created_at: now,
                updated_at: now,
            },
        };
        self.store.put_quote(&txn, &quote)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                seller_id,
                NotificationKind::QuoteRequested,
                "Quote requested",
                format!("A buyer requested a quote for {}", quote.item.listing_id()),
                json!({ "quote_id": quote.id, "conversation_id": conversation_id }),
            ),
        )
        .await;
        Ok(quote)
    }

    /// Seller prices a negotiation. Updates the outstanding requested
    /// quote in place, or creates a new `sent` quote.
    ///
    /// Design-first enforcement: when the item requires both a quote and
    /// an approved design, sending fails until an approved design covers
    /// the same scope; the matching approval is auto-linked.
    pub async fn send_quote(
        &self,
        principal: &Principal,
        conversation_id: &str,
        buyer_id: &str,
        item: ItemRef,
        input: SendQuoteInput,
    ) -> EngineResult<Quote> {
        principal.require_role(Role::Seller)?;
        input.validate()?;
        money::validate_price(input.price, "quoted price")?;

        let now = now_millis();
        let expires_at = match input.expires_at {
            Some(at) if at <= now => {
                return Err(EngineError::validation("quote expiry must be in the future"));
            }
            Some(at) => at,
            None => millis_after_days(now, self.config.quote_validity_days),
        };

        let txn = self.store.begin_write()?;
        let gating = self.store.gating_for_item_txn(&txn, &item)?;
        principal.require_self(&gating.seller_id, "listing")?;

        // Design-first gate, re-read inside the scope
        let design_approval_id = if gating.requires_quote && gating.requires_design {
            let designs = self.store.designs_for_conversation_txn(&txn, conversation_id)?;
            match find_approved_design(&designs, &item, gating.single_config) {
                Some(design) => Some(design.id.clone()),
                None => {
                    return Err(EngineError::RequirementNotMet {
                        reasons: vec![RequirementReason::DesignRequired],
                    });
                }
            }
        } else {
            None
        };

        let existing = self
            .store
            .quotes_for_conversation_txn(&txn, conversation_id)?
            .into_iter()
            .find(|q| q.item == item && q.status == QuoteStatus::Requested);

        let quote = match existing {
            Some(mut quote) => {
                quote.status = QuoteStatus::Sent;
                quote.quoted_price = Some(input.price);
                quote.quantity = input.quantity;
                quote.expires_at = Some(expires_at);
                quote.design_approval_id = design_approval_id;
                quote.updated_at = now;
                quote
            }
            None => Quote {
                id: new_id("qt"),
                conversation_id: conversation_id.to_string(),
                buyer_id: buyer_id.to_string(),
                seller_id: principal.id.clone(),
                item,
                status: QuoteStatus::Sent,
                quoted_price: Some(input.price),
                quantity: input.quantity,
                expires_at: Some(expires_at),
                design_approval_id,
                created_at: now,
                updated_at: now,
            },
        };
        self.store.put_quote(&txn, &quote)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                quote.buyer_id.clone(),
                NotificationKind::QuoteSent,
                "Quote received",
                format!(
                    "The seller quoted {} x{}",
                    input.price, quote.quantity
                ),
                json!({ "quote_id": quote.id, "conversation_id": conversation_id }),
            ),
        )
        .await;
        Ok(quote)
    }

    /// Buyer accepts a sent quote. Fails on anything but `sent`, and on
    /// a quote past its expiry; neither failure touches the row.
    pub async fn accept_quote(&self, principal: &Principal, quote_id: &str) -> EngineResult<Quote> {
        self.decide(principal, quote_id, QuoteStatus::Accepted).await
    }

    /// Buyer rejects a sent quote.
    pub async fn reject_quote(&self, principal: &Principal, quote_id: &str) -> EngineResult<Quote> {
        self.decide(principal, quote_id, QuoteStatus::Rejected).await
    }

    async fn decide(
        &self,
        principal: &Principal,
        quote_id: &str,
        decision: QuoteStatus,
    ) -> EngineResult<Quote> {
        principal.require_role(Role::Buyer)?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut quote = self.store.quote_txn(&txn, quote_id)?;
        principal.require_self(&quote.buyer_id, "quote")?;

        if quote.status != QuoteStatus::Sent {
            return Err(EngineError::InvalidTransition {
                entity: "quote",
                id: quote.id,
                action: match decision {
                    QuoteStatus::Accepted => "accept",
                    _ => "reject",
                },
                current: quote.status.to_string(),
                allowed: QuoteStatus::allowed_for_decision()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            });
        }
        if decision == QuoteStatus::Accepted && quote.is_past_expiry(now) {
            return Err(EngineError::expired(format!("quote {} has expired", quote.id)));
        }

        quote.status = decision;
        quote.updated_at = now;
        self.store.put_quote(&txn, &quote)?;
        self.store.commit(txn)?;

        let (kind, title) = match decision {
            QuoteStatus::Accepted => (NotificationKind::QuoteAccepted, "Quote accepted"),
            _ => (NotificationKind::QuoteRejected, "Quote rejected"),
        };
        emit(
            &self.sink,
            NotificationEvent::new(
                quote.seller_id.clone(),
                kind,
                title,
                format!("The buyer responded to quote {}", quote.id),
                json!({ "quote_id": quote.id }),
            ),
        )
        .await;
        Ok(quote)
    }

    /// Read-side view with expiry applied.
    pub fn quote_view(&self, quote_id: &str) -> EngineResult<(Quote, QuoteStatus)> {
        let quote = self.store.quote(quote_id)?;
        let effective = quote.effective_status(now_millis());
        Ok((quote, effective))
    }
}
