//! Escrow transaction ledger.
//!
//! Money state per transaction: pending → escrow → released | refunded.
//! Escrow entry happens via explicit admin confirmation or the gateway
//! webhook (idempotent: a repeat for an already-escrow transaction is a
//! no-op with no duplicate notification). Release requires the parent
//! order to have reached shipped/delivered (bookings: completed).

use std::sync::Arc;

use redb::WriteTransaction;
use rust_decimal::Decimal;
use serde_json::json;

use shared::models::{
    BookingStatus, BoostStatus, OrderStatus, Transaction, TransactionParent, TransactionStatus,
};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::{millis_after_days, now_millis};
use shared::{EngineError, EngineResult, Principal, Role};

use crate::db::{EntityStore, GatewayRefTarget};
use crate::gateway::{WebhookEvent, WebhookStatus};
use crate::money;
use crate::notify::{emit, NotificationSink};

pub struct EscrowManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
}

impl EscrowManager {
    pub fn new(store: EntityStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Buyer attaches bank-transfer proof to a pending transaction.
    pub async fn record_payment_slip(
        &self,
        principal: &Principal,
        transaction_id: &str,
        bank_account_id: &str,
        slip_url: &str,
    ) -> EngineResult<Transaction> {
        principal.require_role(Role::Buyer)?;
        if slip_url.is_empty() {
            return Err(EngineError::validation("payment slip URL must not be empty"));
        }

        let txn = self.store.begin_write()?;
        let mut transaction = self.store.transaction_txn(&txn, transaction_id)?;
        principal.require_self(&transaction.buyer_id, "transaction")?;
        if transaction.status != TransactionStatus::Pending {
            return Err(invalid_transition(&transaction, "attach payment slip", &[
                TransactionStatus::Pending,
            ]));
        }
        transaction.bank_account_id = Some(bank_account_id.to_string());
        transaction.payment_slip_url = Some(slip_url.to_string());
        transaction.updated_at = now_millis();
        self.store.put_transaction(&txn, &transaction)?;
        self.store.commit(txn)?;
        Ok(transaction)
    }

    /// Admin confirms a payment (bank transfer against the slip).
    /// Moves pending → escrow and flips the parent to paid/active.
    pub async fn confirm_payment(
        &self,
        principal: &Principal,
        transaction_id: &str,
    ) -> EngineResult<Transaction> {
        principal.require_admin()?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut transaction = self.store.transaction_txn(&txn, transaction_id)?;
        if transaction.status != TransactionStatus::Pending {
            return Err(invalid_transition(&transaction, "confirm payment", &[
                TransactionStatus::Pending,
            ]));
        }
        let mut notifications = Vec::new();
        self.move_to_escrow(&txn, &mut transaction, now, &mut notifications)?;
        self.store.commit(txn)?;

        for event in notifications {
            emit(&self.sink, event).await;
        }
        Ok(transaction)
    }

    /// Gateway webhook entry point. Maps a paid reference to
    /// pending → escrow for every transaction it settles, idempotently:
    /// transactions already in escrow are skipped without error or
    /// duplicate notification. Returns how many transitions happened.
    pub async fn handle_gateway_webhook(&self, event: WebhookEvent) -> EngineResult<usize> {
        if event.status == WebhookStatus::Failed {
            tracing::warn!(reference = %event.reference, "gateway reported failed payment");
            return Ok(0);
        }

        let target = self.store.gateway_ref(&event.reference)?;
        let now = now_millis();
        let mut notifications = Vec::new();
        let mut transitioned = 0;

        let txn = self.store.begin_write()?;
        match &target {
            GatewayRefTarget::Session(session_id) => {
                let session = self.store.session_txn(&txn, session_id)?;
                if event.amount != session.grand_total {
                    return Err(EngineError::validation(format!(
                        "webhook amount {} does not match session total {}",
                        event.amount, session.grand_total
                    )));
                }
                let parent_ids = session
                    .order_ids
                    .iter()
                    .chain(session.booking_ids.iter());
                for parent_id in parent_ids {
                    for mut transaction in
                        self.store.transactions_for_parent_txn(&txn, parent_id)?
                    {
                        match transaction.status {
                            TransactionStatus::Pending => {
                                self.move_to_escrow(&txn, &mut transaction, now, &mut notifications)?;
                                transitioned += 1;
                            }
                            TransactionStatus::Escrow => {
                                tracing::debug!(
                                    transaction_id = %transaction.id,
                                    "repeated webhook for escrowed transaction, no-op"
                                );
                            }
                            other => {
                                tracing::warn!(
                                    transaction_id = %transaction.id,
                                    status = %other,
                                    "webhook for terminal transaction ignored"
                                );
                            }
                        }
                    }
                }
            }
            GatewayRefTarget::Transaction(transaction_id) => {
                let mut transaction = self.store.transaction_txn(&txn, transaction_id)?;
                if event.amount != transaction.amount {
                    return Err(EngineError::validation(format!(
                        "webhook amount {} does not match transaction amount {}",
                        event.amount, transaction.amount
                    )));
                }
                if transaction.status == TransactionStatus::Pending {
                    self.move_to_escrow(&txn, &mut transaction, now, &mut notifications)?;
                    transitioned += 1;
                }
            }
        }
        self.store.commit(txn)?;

        for event in notifications {
            emit(&self.sink, event).await;
        }
        Ok(transitioned)
    }

    /// Admin releases an escrowed payment to the seller. The parent
    /// order must be shipped or delivered (booking: completed).
    pub async fn release(
        &self,
        principal: &Principal,
        transaction_id: &str,
    ) -> EngineResult<Transaction> {
        principal.require_admin()?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut transaction = self.store.transaction_txn(&txn, transaction_id)?;
        self.release_one(&txn, &mut transaction, now)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                transaction.seller_id.clone(),
                NotificationKind::PayoutReleased,
                "Payout released",
                format!("Payout of {} released", transaction.seller_payout),
                json!({ "transaction_id": transaction.id }),
            ),
        )
        .await;
        Ok(transaction)
    }

    /// Release every escrowed transaction of an order, skipping those in
    /// any other state. Each release is independently idempotent, so
    /// partial progress here is acceptable (unlike checkout).
    pub async fn release_all_for_order(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> EngineResult<usize> {
        principal.require_admin()?;
        let now = now_millis();
        let mut released = Vec::new();

        let txn = self.store.begin_write()?;
        // The order gate applies once for all of them
        let order = self.store.order_txn(&txn, order_id)?;
        if !matches!(order.status, OrderStatus::Shipped | OrderStatus::Delivered) {
            return Err(EngineError::InvalidTransition {
                entity: "order",
                id: order.id,
                action: "release payment",
                current: order.status.to_string(),
                allowed: vec![
                    OrderStatus::Shipped.to_string(),
                    OrderStatus::Delivered.to_string(),
                ],
            });
        }
        for mut transaction in self.store.transactions_for_parent_txn(&txn, order_id)? {
            if transaction.status != TransactionStatus::Escrow {
                continue;
            }
            self.release_one(&txn, &mut transaction, now)?;
            released.push(transaction);
        }
        self.store.commit(txn)?;

        let count = released.len();
        for transaction in released {
            emit(
                &self.sink,
                NotificationEvent::new(
                    transaction.seller_id.clone(),
                    NotificationKind::PayoutReleased,
                    "Payout released",
                    format!("Payout of {} released", transaction.seller_payout),
                    json!({ "transaction_id": transaction.id }),
                ),
            )
            .await;
        }
        Ok(count)
    }

    // ========== Internal transitions ==========

    fn move_to_escrow(
        &self,
        txn: &WriteTransaction,
        transaction: &mut Transaction,
        now: i64,
        notifications: &mut Vec<NotificationEvent>,
    ) -> EngineResult<()> {
        transaction.status = TransactionStatus::Escrow;
        transaction.escrowed_at = Some(now);
        transaction.updated_at = now;
        self.store.put_transaction(txn, transaction)?;

        match &transaction.parent {
            TransactionParent::Order(order_id) => {
                let mut order = self.store.order_txn(txn, order_id)?;
                if order.status == OrderStatus::PendingPayment {
                    order.status = OrderStatus::Paid;
                    order.updated_at = now;
                    self.store.put_order(txn, &order)?;
                    notifications.push(NotificationEvent::new(
                        order.buyer_id.clone(),
                        NotificationKind::OrderPaid,
                        "Payment confirmed",
                        format!("Payment for order {} is in escrow", order.id),
                        json!({ "order_id": order.id }),
                    ));
                    notifications.push(NotificationEvent::new(
                        order.seller_id.clone(),
                        NotificationKind::OrderPaid,
                        "Order paid",
                        format!("Order {} is paid, prepare the shipment", order.id),
                        json!({ "order_id": order.id }),
                    ));
                }
            }
            TransactionParent::Booking(booking_id) => {
                let mut booking = self.store.booking_txn(txn, booking_id)?;
                if booking.status == BookingStatus::PendingPayment {
                    booking.status = BookingStatus::Paid;
                    booking.updated_at = now;
                    self.store.put_booking(txn, &booking)?;
                    notifications.push(NotificationEvent::new(
                        booking.buyer_id.clone(),
                        NotificationKind::BookingPaid,
                        "Payment confirmed",
                        format!("Payment for booking {} is in escrow", booking.id),
                        json!({ "booking_id": booking.id }),
                    ));
                    notifications.push(NotificationEvent::new(
                        booking.seller_id.clone(),
                        NotificationKind::BookingPaid,
                        "Booking paid",
                        format!("Booking {} is paid", booking.id),
                        json!({ "booking_id": booking.id }),
                    ));
                }
            }
            TransactionParent::Boost(boost_id) => {
                // Activation window starts at payment confirmation
                let mut boost = self.store.boost_txn(txn, boost_id)?;
                if boost.status == BoostStatus::PendingPayment {
                    boost.status = BoostStatus::Active;
                    boost.starts_at = Some(now);
                    boost.ends_at = Some(millis_after_days(now, boost.duration_days as i64));
                    boost.updated_at = now;
                    self.store.put_boost(txn, &boost)?;
                }
            }
        }
        Ok(())
    }

    fn release_one(
        &self,
        txn: &WriteTransaction,
        transaction: &mut Transaction,
        now: i64,
    ) -> EngineResult<()> {
        if transaction.status != TransactionStatus::Escrow {
            return Err(invalid_transition(transaction, "release", &[
                TransactionStatus::Escrow,
            ]));
        }
        match &transaction.parent {
            TransactionParent::Order(order_id) => {
                let order = self.store.order_txn(txn, order_id)?;
                if !matches!(order.status, OrderStatus::Shipped | OrderStatus::Delivered) {
                    return Err(EngineError::InvalidTransition {
                        entity: "order",
                        id: order.id,
                        action: "release payment",
                        current: order.status.to_string(),
                        allowed: vec![
                            OrderStatus::Shipped.to_string(),
                            OrderStatus::Delivered.to_string(),
                        ],
                    });
                }
            }
            TransactionParent::Booking(booking_id) => {
                let booking = self.store.booking_txn(txn, booking_id)?;
                if booking.status != BookingStatus::Completed {
                    return Err(EngineError::InvalidTransition {
                        entity: "booking",
                        id: booking.id,
                        action: "release payment",
                        current: booking.status.to_string(),
                        allowed: vec![BookingStatus::Completed.to_string()],
                    });
                }
            }
            TransactionParent::Boost(_) => {
                return Err(EngineError::validation(
                    "boost transactions are retained by the platform and never released",
                ));
            }
        }
        transaction.status = TransactionStatus::Released;
        transaction.released_at = Some(now);
        transaction.updated_at = now;
        self.store.put_transaction(txn, transaction)?;
        Ok(())
    }

}

/// Refund a transaction inside an existing scope (cancellation and
/// return resolution both end here). Reverses the recorded commission;
/// `amount` defaults to the full transaction amount.
pub(crate) fn apply_refund(
    store: &EntityStore,
    txn: &WriteTransaction,
    transaction_id: &str,
    amount: Option<Decimal>,
    now: i64,
) -> EngineResult<Transaction> {
    let mut transaction = store.transaction_txn(txn, transaction_id)?;
    if transaction.status.is_terminal() {
        return Err(invalid_transition(&transaction, "refund", &[
            TransactionStatus::Pending,
            TransactionStatus::Escrow,
        ]));
    }
    let refund = amount.unwrap_or(transaction.amount);
    money::validate_amount(refund, "refund amount")?;
    if refund > transaction.amount {
        return Err(EngineError::validation(format!(
            "refund amount {} exceeds transaction amount {}",
            refund, transaction.amount
        )));
    }
    transaction.status = TransactionStatus::Refunded;
    transaction.refunded_amount = Some(refund);
    transaction.refunded_at = Some(now);
    // Commission reversal: the platform gives back its cut
    transaction.commission_amount = Decimal::ZERO;
    transaction.seller_payout = transaction.amount;
    transaction.updated_at = now;
    store.put_transaction(txn, &transaction)?;
    Ok(transaction)
}

fn invalid_transition(
    transaction: &Transaction,
    action: &'static str,
    allowed: &[TransactionStatus],
) -> EngineError {
    EngineError::InvalidTransition {
        entity: "transaction",
        id: transaction.id.clone(),
        action,
        current: transaction.status.to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    }
}
