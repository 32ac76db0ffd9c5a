//! Return request resolution workflow: buyer opens, seller recommends,
//! admin resolves (and can override the seller), refund execution
//! mutates the escrow ledger.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;

use shared::models::{
    BookingStatus, OrderStatus, ReturnParent, ReturnRequest, ReturnStatus, SellerReviewStatus,
    SubmitReturnInput,
};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::now_millis;
use shared::{new_id, EngineError, EngineResult, Id, Principal, Role};
use validator::Validate;

use crate::config::EngineConfig;
use crate::db::EntityStore;
use crate::escrow::apply_refund;
use crate::money;
use crate::notify::{emit, NotificationSink};

pub struct ReturnManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl ReturnManager {
    pub fn new(store: EntityStore, sink: Arc<dyn NotificationSink>, config: EngineConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    /// Buyer opens a return. Orders must be delivered and under the
    /// attempt cap; bookings must be paid, ongoing or completed. Only
    /// one active request per parent at a time.
    pub async fn buyer_submit(
        &self,
        principal: &Principal,
        parent: ReturnParent,
        input: SubmitReturnInput,
    ) -> EngineResult<ReturnRequest> {
        principal.require_role(Role::Buyer)?;
        input.validate()?;
        money::validate_price(input.requested_amount, "requested refund amount")?;

        let now = now_millis();
        let txn = self.store.begin_write()?;

        let seller_id: Id;
        match &parent {
            ReturnParent::Order(order_id) => {
                let mut order = self.store.order_txn(&txn, order_id)?;
                principal.require_self(&order.buyer_id, "order")?;
                if order.status != OrderStatus::Delivered {
                    return Err(EngineError::InvalidTransition {
                        entity: "order",
                        id: order.id,
                        action: "open return",
                        current: order.status.to_string(),
                        allowed: vec![OrderStatus::Delivered.to_string()],
                    });
                }
                if order.return_attempt_count >= self.config.max_return_attempts {
                    return Err(EngineError::validation(format!(
                        "order {} reached the return attempt limit ({})",
                        order.id, self.config.max_return_attempts
                    )));
                }
                seller_id = order.seller_id.clone();
                order.return_attempt_count += 1;
                order.updated_at = now;
                self.store.put_order(&txn, &order)?;
            }
            ReturnParent::Booking(booking_id) => {
                let booking = self.store.booking_txn(&txn, booking_id)?;
                principal.require_self(&booking.buyer_id, "booking")?;
                if !matches!(
                    booking.status,
                    BookingStatus::Paid | BookingStatus::Ongoing | BookingStatus::Completed
                ) {
                    return Err(EngineError::InvalidTransition {
                        entity: "booking",
                        id: booking.id,
                        action: "open return",
                        current: booking.status.to_string(),
                        allowed: vec![
                            BookingStatus::Paid.to_string(),
                            BookingStatus::Ongoing.to_string(),
                            BookingStatus::Completed.to_string(),
                        ],
                    });
                }
                seller_id = booking.seller_id.clone();
            }
        }

        // The create path enforces single-active, not a uniqueness
        // constraint
        let existing = self
            .store
            .returns_for_parent_txn(&txn, parent.parent_id())?;
        if existing.iter().any(|r| r.status.is_active()) {
            return Err(EngineError::validation(format!(
                "an active return request already exists for {}",
                parent.parent_id()
            )));
        }

        let transaction = self
            .store
            .transactions_for_parent_txn(&txn, parent.parent_id())?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::not_found("transaction", parent.parent_id()))?;
        if input.requested_amount > transaction.amount {
            return Err(EngineError::validation(format!(
                "requested refund {} exceeds the transaction amount {}",
                input.requested_amount, transaction.amount
            )));
        }

        let request = ReturnRequest {
            id: new_id("ret"),
            parent,
            buyer_id: principal.id.clone(),
            seller_id: seller_id.clone(),
            transaction_id: transaction.id,
            reason: input.reason,
            evidence_urls: input.evidence_urls,
            status: ReturnStatus::Requested,
            seller_status: SellerReviewStatus::Pending,
            seller_proposed_amount: None,
            seller_notes: None,
            requested_amount: input.requested_amount,
            approved_refund_amount: None,
            admin_notes: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_return(&txn, &request)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                seller_id,
                NotificationKind::ReturnOpened,
                "Return requested",
                format!("A buyer opened return {}", request.id),
                json!({ "return_id": request.id }),
            ),
        )
        .await;
        Ok(request)
    }

    /// Seller records a recommendation. A `requested` request moves to
    /// `under_review` automatically as part of responding.
    pub async fn seller_respond(
        &self,
        principal: &Principal,
        return_id: &str,
        approve: bool,
        proposed_amount: Option<Decimal>,
        notes: Option<String>,
    ) -> EngineResult<ReturnRequest> {
        principal.require_role(Role::Seller)?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut request = self.store.return_txn(&txn, return_id)?;
        principal.require_self(&request.seller_id, "return request")?;

        if !ReturnStatus::seller_respondable().contains(&request.status) {
            return Err(invalid_return_transition(
                &request,
                "respond",
                ReturnStatus::seller_respondable(),
            ));
        }
        if let Some(amount) = proposed_amount {
            money::validate_amount(amount, "proposed refund amount")?;
            let transaction = self.store.transaction_txn(&txn, &request.transaction_id)?;
            if amount > transaction.amount {
                return Err(EngineError::validation(format!(
                    "proposed refund {} exceeds the transaction amount {}",
                    amount, transaction.amount
                )));
            }
        }

        request.status = if approve {
            ReturnStatus::SellerApproved
        } else {
            ReturnStatus::SellerRejected
        };
        request.seller_status = if approve {
            SellerReviewStatus::Approved
        } else {
            SellerReviewStatus::Rejected
        };
        request.seller_proposed_amount = proposed_amount;
        request.seller_notes = notes;
        request.updated_at = now;
        self.store.put_return(&txn, &request)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                request.buyer_id.clone(),
                NotificationKind::ReturnSellerResponded,
                "Seller responded",
                format!("The seller responded to return {}", request.id),
                json!({ "return_id": request.id, "seller_approved": approve }),
            ),
        )
        .await;
        Ok(request)
    }

    /// Admin resolves the request, optionally overriding the seller's
    /// recommendation. Approval requires an approved refund amount.
    pub async fn admin_resolve(
        &self,
        principal: &Principal,
        return_id: &str,
        approve: bool,
        approved_refund_amount: Option<Decimal>,
        notes: Option<String>,
    ) -> EngineResult<ReturnRequest> {
        principal.require_admin()?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut request = self.store.return_txn(&txn, return_id)?;

        if !ReturnStatus::admin_resolvable().contains(&request.status) {
            return Err(invalid_return_transition(
                &request,
                "resolve",
                ReturnStatus::admin_resolvable(),
            ));
        }

        if approve {
            let amount = approved_refund_amount.ok_or_else(|| {
                EngineError::validation("approval requires an approved refund amount")
            })?;
            money::validate_price(amount, "approved refund amount")?;
            let transaction = self.store.transaction_txn(&txn, &request.transaction_id)?;
            if amount > transaction.amount {
                return Err(EngineError::validation(format!(
                    "approved refund {} exceeds the transaction amount {}",
                    amount, transaction.amount
                )));
            }
            request.status = ReturnStatus::AdminApproved;
            request.approved_refund_amount = Some(amount);
        } else {
            request.status = ReturnStatus::AdminRejected;
        }
        request.admin_notes = notes;
        request.updated_at = now;
        self.store.put_return(&txn, &request)?;
        self.store.commit(txn)?;

        for user_id in [request.buyer_id.clone(), request.seller_id.clone()] {
            emit(
                &self.sink,
                NotificationEvent::new(
                    user_id,
                    NotificationKind::ReturnResolved,
                    "Return resolved",
                    format!(
                        "Return {} was {}",
                        request.id,
                        if approve { "approved" } else { "rejected" }
                    ),
                    json!({ "return_id": request.id, "approved": approve }),
                ),
            )
            .await;
        }
        Ok(request)
    }

    /// Execute the refund for an admin-approved request. Flips the
    /// linked transaction to refunded (reversing the commission) and
    /// completes the request; this is the only path to `completed`.
    pub async fn process_refund(
        &self,
        principal: &Principal,
        return_id: &str,
    ) -> EngineResult<ReturnRequest> {
        principal.require_admin()?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut request = self.store.return_txn(&txn, return_id)?;
        if request.status != ReturnStatus::AdminApproved {
            return Err(invalid_return_transition(
                &request,
                "process refund",
                &[ReturnStatus::AdminApproved],
            ));
        }
        let amount = request.approved_refund_amount.ok_or_else(|| {
            EngineError::validation("approved request carries no refund amount")
        })?;

        apply_refund(&self.store, &txn, &request.transaction_id, Some(amount), now)?;
        // Refund and completion commit together; the request is never
        // observable at rest between the two.
        request.status = ReturnStatus::Completed;
        request.updated_at = now;
        self.store.put_return(&txn, &request)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                request.buyer_id.clone(),
                NotificationKind::ReturnRefunded,
                "Refund issued",
                format!("Refund of {} issued for return {}", amount, request.id),
                json!({ "return_id": request.id, "amount": amount.to_string() }),
            ),
        )
        .await;
        Ok(request)
    }

    /// Cancel an active request (buyer withdraws, or admin housekeeping).
    pub async fn cancel(
        &self,
        principal: &Principal,
        return_id: &str,
    ) -> EngineResult<ReturnRequest> {
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut request = self.store.return_txn(&txn, return_id)?;
        if principal.role != Role::Admin && principal.id != request.buyer_id {
            return Err(EngineError::forbidden(format!(
                "principal {} cannot cancel return {}",
                principal.id, request.id
            )));
        }
        if !request.status.is_active() {
            return Err(invalid_return_transition(
                &request,
                "cancel",
                &[
                    ReturnStatus::Requested,
                    ReturnStatus::UnderReview,
                    ReturnStatus::SellerApproved,
                    ReturnStatus::SellerRejected,
                    ReturnStatus::AdminApproved,
                ],
            ));
        }
        request.status = ReturnStatus::Cancelled;
        request.updated_at = now;
        self.store.put_return(&txn, &request)?;
        self.store.commit(txn)?;
        Ok(request)
    }
}

fn invalid_return_transition(
    request: &ReturnRequest,
    action: &'static str,
    allowed: &[ReturnStatus],
) -> EngineError {
    EngineError::InvalidTransition {
        entity: "return request",
        id: request.id.clone(),
        action,
        current: request.status.to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    }
}
