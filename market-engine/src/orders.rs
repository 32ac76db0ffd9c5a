//! Order and booking lifecycle operations outside checkout and
//! shipping: seller readiness, delivery confirmation, cancellation, and
//! the booking progress transitions.
//!
//! Every transition re-reads the row and checks its status inside the
//! write transaction, so a racing writer loses with an
//! invalid-transition error instead of clobbering state.

use std::sync::Arc;

use serde_json::json;

use shared::models::{Booking, BookingStatus, Order, OrderStatus};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::now_millis;
use shared::{EngineError, EngineResult, Principal, Role};

use crate::db::EntityStore;
use crate::escrow::apply_refund;
use crate::notify::{emit, NotificationSink};

pub struct OrderManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
}

impl OrderManager {
    pub fn new(store: EntityStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Seller marks an order packed and awaiting shipment. A paid order
    /// moves to processing at the same time.
    pub async fn mark_ready_to_ship(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> EngineResult<Order> {
        principal.require_role(Role::Seller)?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut order = self.store.order_txn(&txn, order_id)?;
        principal.require_self(&order.seller_id, "order")?;

        match order.status {
            OrderStatus::Paid => order.status = OrderStatus::Processing,
            OrderStatus::Processing => {}
            _ => {
                return Err(invalid_order_transition(&order, "mark ready to ship", &[
                    OrderStatus::Paid,
                    OrderStatus::Processing,
                ]));
            }
        }
        order.ready_to_ship = true;
        order.updated_at = now;
        self.store.put_order(&txn, &order)?;
        self.store.commit(txn)?;
        Ok(order)
    }

    /// Seller withdraws readiness while the order is not yet part of a
    /// shipment.
    pub async fn unmark_ready_to_ship(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> EngineResult<Order> {
        principal.require_role(Role::Seller)?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut order = self.store.order_txn(&txn, order_id)?;
        principal.require_self(&order.seller_id, "order")?;
        if order.shipment_id.is_some() {
            return Err(EngineError::validation(
                "order already belongs to a shipment",
            ));
        }
        order.ready_to_ship = false;
        order.updated_at = now;
        self.store.put_order(&txn, &order)?;
        self.store.commit(txn)?;
        Ok(order)
    }

    /// Admin (or the carrier webhook relay) confirms delivery.
    pub async fn mark_delivered(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> EngineResult<Order> {
        principal.require_admin()?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut order = self.store.order_txn(&txn, order_id)?;
        if order.status != OrderStatus::Shipped {
            return Err(invalid_order_transition(&order, "mark delivered", &[
                OrderStatus::Shipped,
            ]));
        }
        order.status = OrderStatus::Delivered;
        order.updated_at = now;
        self.store.put_order(&txn, &order)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                order.buyer_id.clone(),
                NotificationKind::OrderDelivered,
                "Order delivered",
                format!("Order {} was delivered", order.id),
                json!({ "order_id": order.id }),
            ),
        )
        .await;
        Ok(order)
    }

    /// Cancel an order. Reachable from any non-terminal state, never
    /// from delivered. Refunds the escrowed (or voids the pending)
    /// transaction in the same scope.
    pub async fn cancel_order(
        &self,
        principal: &Principal,
        order_id: &str,
        reason: Option<String>,
    ) -> EngineResult<Order> {
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut order = self.store.order_txn(&txn, order_id)?;
        if principal.role != Role::Admin
            && principal.id != order.buyer_id
            && principal.id != order.seller_id
        {
            return Err(EngineError::forbidden(format!(
                "principal {} is not a party to order {}",
                principal.id, order.id
            )));
        }
        if order.status.is_terminal() {
            return Err(invalid_order_transition(&order, "cancel", &[
                OrderStatus::PendingPayment,
                OrderStatus::Paid,
                OrderStatus::Processing,
                OrderStatus::Shipped,
            ]));
        }

        order.status = OrderStatus::Cancelled;
        order.ready_to_ship = false;
        order.updated_at = now;
        self.store.put_order(&txn, &order)?;

        for transaction in self.store.transactions_for_parent_txn(&txn, &order.id)? {
            if !transaction.status.is_terminal() {
                apply_refund(&self.store, &txn, &transaction.id, None, now)?;
            }
        }
        self.store.commit(txn)?;

        tracing::info!(order_id = %order.id, reason = ?reason, "order cancelled");
        for user_id in [order.buyer_id.clone(), order.seller_id.clone()] {
            emit(
                &self.sink,
                NotificationEvent::new(
                    user_id,
                    NotificationKind::OrderCancelled,
                    "Order cancelled",
                    format!("Order {} was cancelled", order.id),
                    json!({ "order_id": order.id, "reason": reason }),
                ),
            )
            .await;
        }
        Ok(order)
    }

    // ========== Booking lifecycle ==========

    /// Seller starts delivering a paid booking.
    pub async fn start_booking(
        &self,
        principal: &Principal,
        booking_id: &str,
    ) -> EngineResult<Booking> {
        principal.require_role(Role::Seller)?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut booking = self.store.booking_txn(&txn, booking_id)?;
        principal.require_self(&booking.seller_id, "booking")?;
        if booking.status != BookingStatus::Paid {
            return Err(invalid_booking_transition(&booking, "start", &[
                BookingStatus::Paid,
            ]));
        }
        booking.status = BookingStatus::Ongoing;
        booking.updated_at = now;
        self.store.put_booking(&txn, &booking)?;
        self.store.commit(txn)?;
        Ok(booking)
    }

    /// Seller completes an ongoing booking; this opens the escrow
    /// release gate.
    pub async fn complete_booking(
        &self,
        principal: &Principal,
        booking_id: &str,
    ) -> EngineResult<Booking> {
        principal.require_role(Role::Seller)?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut booking = self.store.booking_txn(&txn, booking_id)?;
        principal.require_self(&booking.seller_id, "booking")?;
        if booking.status != BookingStatus::Ongoing {
            return Err(invalid_booking_transition(&booking, "complete", &[
                BookingStatus::Ongoing,
            ]));
        }
        booking.status = BookingStatus::Completed;
        booking.updated_at = now;
        self.store.put_booking(&txn, &booking)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                booking.buyer_id.clone(),
                NotificationKind::BookingCompleted,
                "Booking completed",
                format!("Booking {} was completed", booking.id),
                json!({ "booking_id": booking.id }),
            ),
        )
        .await;
        Ok(booking)
    }

    /// Cancel a booking from any non-terminal state, refunding its
    /// transaction.
    pub async fn cancel_booking(
        &self,
        principal: &Principal,
        booking_id: &str,
        reason: Option<String>,
    ) -> EngineResult<Booking> {
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut booking = self.store.booking_txn(&txn, booking_id)?;
        if principal.role != Role::Admin
            && principal.id != booking.buyer_id
            && principal.id != booking.seller_id
        {
            return Err(EngineError::forbidden(format!(
                "principal {} is not a party to booking {}",
                principal.id, booking.id
            )));
        }
        if booking.status.is_terminal() {
            return Err(invalid_booking_transition(&booking, "cancel", &[
                BookingStatus::PendingPayment,
                BookingStatus::Paid,
                BookingStatus::Ongoing,
            ]));
        }

        booking.status = BookingStatus::Cancelled;
        booking.updated_at = now;
        self.store.put_booking(&txn, &booking)?;
        for transaction in self.store.transactions_for_parent_txn(&txn, &booking.id)? {
            if !transaction.status.is_terminal() {
                apply_refund(&self.store, &txn, &transaction.id, None, now)?;
            }
        }
        self.store.commit(txn)?;

        tracing::info!(booking_id = %booking.id, reason = ?reason, "booking cancelled");
        Ok(booking)
    }
}

fn invalid_order_transition(
    order: &Order,
    action: &'static str,
    allowed: &[OrderStatus],
) -> EngineError {
    EngineError::InvalidTransition {
        entity: "order",
        id: order.id.clone(),
        action,
        current: order.status.to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    }
}

fn invalid_booking_transition(
    booking: &Booking,
    action: &'static str,
    allowed: &[BookingStatus],
) -> EngineError {
    EngineError::InvalidTransition {
        entity: "booking",
        id: booking.id.clone(),
        action,
        current: booking.status.to_string(),
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    }
}
