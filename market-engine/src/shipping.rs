//! Shipment consolidation orchestrator and the single-order shipment
//! path.
//!
//! Preconditions are re-checked against rows re-read inside the write
//! scope. The carrier call happens strictly after commit: a carrier
//! failure leaves the booking pending (retryable) with a warning and
//! never blocks the order-status transition.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;

use shared::models::{
    CarrierStatus, ConsolidateInput, Order, OrderStatus, Shipment, ShipmentKind,
};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::now_millis;
use shared::{new_id, EngineError, EngineResult, Principal};
use validator::Validate;

use crate::carrier::{CarrierClient, ShipmentRequest};
use crate::db::EntityStore;
use crate::notify::{emit, NotificationSink};

pub struct ShippingManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
    carrier: Arc<dyn CarrierClient>,
}

impl ShippingManager {
    pub fn new(
        store: EntityStore,
        sink: Arc<dyn NotificationSink>,
        carrier: Arc<dyn CarrierClient>,
    ) -> Self {
        Self {
            store,
            sink,
            carrier,
        }
    }

    /// Consolidate several ready orders of one buyer and destination
    /// into one physical shipment, flipping all of them to shipped in
    /// one atomic scope.
    pub async fn consolidate(
        &self,
        principal: &Principal,
        input: ConsolidateInput,
    ) -> EngineResult<Shipment> {
        principal.require_admin()?;
        input.validate()?;
        if input.override_incomplete
            && input
                .override_reason
                .as_deref()
                .map_or(true, |r| r.trim().is_empty())
        {
            return Err(EngineError::validation(
                "overriding an incomplete session requires a reason",
            ));
        }

        let now = now_millis();
        let txn = self.store.begin_write()?;

        let mut orders = Vec::with_capacity(input.order_ids.len());
        for order_id in &input.order_ids {
            orders.push(self.store.order_txn(&txn, order_id)?);
        }
        Self::check_shippable(&orders)?;

        let buyer_id = orders[0].buyer_id.clone();
        let destination = orders[0].destination.clone();
        for order in &orders[1..] {
            if order.buyer_id != buyer_id {
                return Err(EngineError::validation(
                    "consolidation requires a single buyer",
                ));
            }
            if order.destination != destination {
                return Err(EngineError::validation(
                    "consolidation requires a single shipping destination",
                ));
            }
        }

        // Session completeness: every touched checkout session must have
        // all its non-cancelled sibling orders ready to ship
        let selected: BTreeSet<&str> = orders.iter().map(|o| o.id.as_str()).collect();
        let session_ids: BTreeSet<String> =
            orders.iter().map(|o| o.session_id.clone()).collect();
        for session_id in &session_ids {
            let session = self.store.session_txn(&txn, session_id)?;
            let mut pending = Vec::new();
            for sibling_id in &session.order_ids {
                if selected.contains(sibling_id.as_str()) {
                    continue;
                }
                let sibling = self.store.order_txn(&txn, sibling_id)?;
                if sibling.status == OrderStatus::Cancelled {
                    continue;
                }
                if !sibling.ready_to_ship {
                    pending.push(sibling.id);
                }
            }
            if !pending.is_empty() {
                if !input.override_incomplete {
                    return Err(EngineError::IncompleteCheckoutSession {
                        session_id: session_id.clone(),
                        pending,
                    });
                }
                tracing::warn!(
                    session_id = %session_id,
                    pending = ?pending,
                    reason = %input.override_reason.as_deref().unwrap_or_default(),
                    "consolidating despite incomplete checkout session"
                );
            }
        }

        let shipment = Shipment {
            id: new_id("shp"),
            kind: ShipmentKind::Consolidated,
            buyer_id: buyer_id.clone(),
            destination: destination.clone(),
            order_ids: orders.iter().map(|o| o.id.clone()).collect(),
            total_weight_grams: orders
                .iter()
                .map(|o| o.shipping_weight_grams as u64)
                .sum(),
            shipping_cost: orders.iter().map(|o| o.shipping_cost).sum(),
            carrier_status: CarrierStatus::Pending,
            awb_id: None,
            label_url: None,
            carrier_cost: None,
            carrier_last_error: None,
            override_incomplete: input.override_incomplete,
            override_reason: input.override_reason.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store.put_shipment(&txn, &shipment)?;

        for order in &mut orders {
            order.status = OrderStatus::Shipped;
            order.shipment_id = Some(shipment.id.clone());
            order.updated_at = now;
            self.store.put_order(&txn, order)?;
        }
        self.store.commit(txn)?;

        tracing::info!(
            shipment_id = %shipment.id,
            orders = shipment.order_ids.len(),
            "consolidated shipment created"
        );
        for order in &orders {
            emit(
                &self.sink,
                NotificationEvent::new(
                    order.buyer_id.clone(),
                    NotificationKind::OrderShipped,
                    "Order shipped",
                    format!("Order {} is on its way", order.id),
                    json!({ "order_id": order.id, "shipment_id": shipment.id }),
                ),
            )
            .await;
        }

        // External call strictly after commit
        Ok(self.book_carrier(shipment).await?)
    }

    /// Ship one order without consolidation. Same readiness rules, same
    /// carrier degradation.
    pub async fn ship_single_order(
        &self,
        principal: &Principal,
        order_id: &str,
    ) -> EngineResult<Shipment> {
        principal.require_admin()?;
        let now = now_millis();

        let txn = self.store.begin_write()?;
        let mut order = self.store.order_txn(&txn, order_id)?;
        Self::check_shippable(std::slice::from_ref(&order))?;

        let shipment = Shipment {
            id: new_id("shp"),
            kind: ShipmentKind::Single,
            buyer_id: order.buyer_id.clone(),
            destination: order.destination.clone(),
            order_ids: vec![order.id.clone()],
            total_weight_grams: order.shipping_weight_grams as u64,
            shipping_cost: order.shipping_cost,
            carrier_status: CarrierStatus::Pending,
            awb_id: None,
            label_url: None,
            carrier_cost: None,
            carrier_last_error: None,
            override_incomplete: false,
            override_reason: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_shipment(&txn, &shipment)?;
        order.status = OrderStatus::Shipped;
        order.shipment_id = Some(shipment.id.clone());
        order.updated_at = now;
        self.store.put_order(&txn, &order)?;
        self.store.commit(txn)?;

        emit(
            &self.sink,
            NotificationEvent::new(
                order.buyer_id.clone(),
                NotificationKind::OrderShipped,
                "Order shipped",
                format!("Order {} is on its way", order.id),
                json!({ "order_id": order.id, "shipment_id": shipment.id }),
            ),
        )
        .await;

        Ok(self.book_carrier(shipment).await?)
    }

    /// Re-attempt a failed carrier booking.
    pub async fn retry_carrier_booking(
        &self,
        principal: &Principal,
        shipment_id: &str,
    ) -> EngineResult<Shipment> {
        principal.require_admin()?;
        let shipment = self.store.shipment(shipment_id)?;
        if shipment.carrier_status == CarrierStatus::Booked {
            return Err(EngineError::validation("shipment is already booked"));
        }
        Ok(self.book_carrier(shipment).await?)
    }

    /// Mark every shipped member order of a shipment delivered.
    pub async fn deliver_shipment(
        &self,
        principal: &Principal,
        shipment_id: &str,
    ) -> EngineResult<Vec<Order>> {
        principal.require_admin()?;
        let now = now_millis();
        let mut delivered = Vec::new();

        let txn = self.store.begin_write()?;
        let shipment = self.store.shipment_txn(&txn, shipment_id)?;
        for order_id in &shipment.order_ids {
            let mut order = self.store.order_txn(&txn, order_id)?;
            // Members cancelled after shipping are left alone
            if order.status != OrderStatus::Shipped {
                continue;
            }
            order.status = OrderStatus::Delivered;
            order.updated_at = now;
            self.store.put_order(&txn, &order)?;
            delivered.push(order);
        }
        self.store.commit(txn)?;

        for order in &delivered {
            emit(
                &self.sink,
                NotificationEvent::new(
                    order.buyer_id.clone(),
                    NotificationKind::OrderDelivered,
                    "Order delivered",
                    format!("Order {} was delivered", order.id),
                    json!({ "order_id": order.id, "shipment_id": shipment_id }),
                ),
            )
            .await;
        }
        Ok(delivered)
    }

    fn check_shippable(orders: &[Order]) -> EngineResult<()> {
        for order in orders {
            if !matches!(order.status, OrderStatus::Paid | OrderStatus::Processing) {
                return Err(EngineError::InvalidTransition {
                    entity: "order",
                    id: order.id.clone(),
                    action: "ship",
                    current: order.status.to_string(),
                    allowed: vec![
                        OrderStatus::Paid.to_string(),
                        OrderStatus::Processing.to_string(),
                    ],
                });
            }
            if !order.ready_to_ship {
                return Err(EngineError::validation(format!(
                    "order {} is not marked ready to ship",
                    order.id
                )));
            }
            if order.shipment_id.is_some() {
                return Err(EngineError::validation(format!(
                    "order {} already belongs to a shipment",
                    order.id
                )));
            }
        }
        Ok(())
    }

    /// Book with the external carrier after the orders are already
    /// shipped. Failure degrades to a pending carrier state.
    async fn book_carrier(&self, shipment: Shipment) -> EngineResult<Shipment> {
        let request = ShipmentRequest {
            reference: shipment.id.clone(),
            destination: shipment.destination.clone(),
            total_weight_grams: shipment.total_weight_grams,
            parcel_count: shipment.order_ids.len() as u32,
        };
        let now = now_millis();
        let txn = self.store.begin_write()?;
        let mut updated = self.store.shipment_txn(&txn, &shipment.id)?;
        match self.carrier.create_shipment(&request).await {
            Ok(receipt) => {
                updated.carrier_status = CarrierStatus::Booked;
                updated.awb_id = Some(receipt.awb_id);
                updated.label_url = Some(receipt.label_url);
                updated.carrier_cost = Some(receipt.cost);
                updated.carrier_last_error = None;
            }
            Err(err) => {
                tracing::warn!(
                    shipment_id = %shipment.id,
                    error = %err,
                    "carrier booking failed, shipment stays pending for retry"
                );
                updated.carrier_last_error = Some(err.to_string());
            }
        }
        updated.updated_at = now;
        self.store.put_shipment(&txn, &updated)?;
        self.store.commit(txn)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::StubCarrier;
    use crate::cart::CartManager;
    use crate::checkout::CheckoutManager;
    use crate::config::EngineConfig;
    use crate::escrow::EscrowManager;
    use crate::notify::{MemorySink, NotificationSink};
    use crate::orders::OrderManager;
    use crate::testutil::{other_address, seed_product, store_with_users, test_address};
    use shared::models::{CartAddInput, CheckoutInput, ItemRef, PaymentMethod, ShippingAddress};
    use shared::Role;

    struct Rig {
        store: EntityStore,
        sink: Arc<MemorySink>,
        carrier: Arc<StubCarrier>,
        shipping: ShippingManager,
        orders: OrderManager,
    }

    fn rig() -> Rig {
        let store = store_with_users();
        let sink = MemorySink::new();
        let carrier = Arc::new(StubCarrier::new());
        let shipping = ShippingManager::new(
            store.clone(),
            sink.clone() as Arc<dyn NotificationSink>,
            carrier.clone() as Arc<dyn CarrierClient>,
        );
        let orders = OrderManager::new(store.clone(), sink.clone() as Arc<dyn NotificationSink>);
        Rig {
            store,
            sink,
            carrier,
            shipping,
            orders,
        }
    }

    /// Checkout `lines` one-variant lines in a single session, confirm
    /// payment, and return the order ids.
    async fn paid_session(rig: &Rig, lines: usize) -> Vec<String> {
        paid_session_to(rig, lines, test_address()).await
    }

    async fn paid_session_to(rig: &Rig, lines: usize, destination: ShippingAddress) -> Vec<String> {
        let cart = CartManager::new(rig.store.clone());
        let checkout = CheckoutManager::new(
            rig.store.clone(),
            rig.sink.clone() as Arc<dyn NotificationSink>,
            EngineConfig::default(),
        );
        let buyer = Principal::buyer("usr_buyer");
        for _ in 0..lines {
            let (product_id, variant_id) = seed_product(&rig.store, "usr_seller", false, false);
            cart.add_item(
                &buyer,
                CartAddInput {
                    item: ItemRef::product(product_id, Some(variant_id)),
                    quantity: 1,
                    quote_id: None,
                },
            )
            .await
            .unwrap();
        }
        let outcome = checkout
            .checkout(
                &buyer,
                CheckoutInput {
                    payment_method: PaymentMethod::BankTransfer,
                    destination,
                    bank_account_id: Some("bank_1".into()),
                },
            )
            .await
            .unwrap();
        let order_ids = outcome.session().order_ids.clone();

        let escrow = EscrowManager::new(
            rig.store.clone(),
            rig.sink.clone() as Arc<dyn NotificationSink>,
        );
        for order_id in &order_ids {
            let transaction_id = rig.store.transactions_for_parent(order_id).unwrap()[0]
                .id
                .clone();
            escrow
                .confirm_payment(&Principal::admin("usr_admin"), &transaction_id)
                .await
                .unwrap();
        }
        order_ids
    }

    async fn mark_all_ready(rig: &Rig, order_ids: &[String]) {
        let seller = Principal::seller("usr_seller");
        for order_id in order_ids {
            rig.orders
                .mark_ready_to_ship(&seller, order_id)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_consolidate_ships_all_members() {
        let rig = rig();
        let order_ids = paid_session(&rig, 2).await;
        mark_all_ready(&rig, &order_ids).await;

        let shipment = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids: order_ids.clone(),
                    override_incomplete: false,
                    override_reason: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(shipment.kind, ShipmentKind::Consolidated);
        assert_eq!(shipment.carrier_status, CarrierStatus::Booked);
        assert!(shipment.awb_id.is_some());

        for order_id in &order_ids {
            let order = rig.store.order(order_id).unwrap();
            assert_eq!(order.status, OrderStatus::Shipped);
            assert_eq!(order.shipment_id.as_deref(), Some(shipment.id.as_str()));
        }
        assert_eq!(rig.sink.count_of(NotificationKind::OrderShipped), 2);
    }

    #[tokio::test]
    async fn test_incomplete_session_blocks_without_override() {
        let rig = rig();
        let order_ids = paid_session(&rig, 3).await;
        // Only two of three siblings ready
        mark_all_ready(&rig, &order_ids[..2].to_vec()).await;

        let err = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids: order_ids[..2].to_vec(),
                    override_incomplete: false,
                    override_reason: None,
                },
            )
            .await
            .unwrap_err();
        match err {
            EngineError::IncompleteCheckoutSession { pending, .. } => {
                assert_eq!(pending, vec![order_ids[2].clone()]);
            }
            other => panic!("expected IncompleteCheckoutSession, got {:?}", other),
        }

        // With an explicit override and reason it goes through
        let shipment = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids: order_ids[..2].to_vec(),
                    override_incomplete: true,
                    override_reason: Some("third parcel delayed at supplier".into()),
                },
            )
            .await
            .unwrap();
        assert!(shipment.override_incomplete);
        assert_eq!(
            shipment.override_reason.as_deref(),
            Some("third parcel delayed at supplier")
        );
    }

    #[tokio::test]
    async fn test_override_requires_reason() {
        let rig = rig();
        let err = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids: vec!["ord_x".into()],
                    override_incomplete: true,
                    override_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_carrier_failure_degrades_but_orders_ship() {
        let rig = rig();
        rig.carrier.set_failing(true);
        let order_ids = paid_session(&rig, 1).await;
        mark_all_ready(&rig, &order_ids).await;

        let shipment = rig
            .shipping
            .ship_single_order(&Principal::admin("usr_admin"), &order_ids[0])
            .await
            .unwrap();
        // Orders shipped regardless, carrier stays pending
        assert_eq!(shipment.carrier_status, CarrierStatus::Pending);
        assert!(shipment.carrier_last_error.is_some());
        assert_eq!(
            rig.store.order(&order_ids[0]).unwrap().status,
            OrderStatus::Shipped
        );

        // Retry succeeds once the carrier recovers
        rig.carrier.set_failing(false);
        let retried = rig
            .shipping
            .retry_carrier_booking(&Principal::admin("usr_admin"), &shipment.id)
            .await
            .unwrap();
        assert_eq!(retried.carrier_status, CarrierStatus::Booked);
    }

    #[tokio::test]
    async fn test_not_ready_order_rejected() {
        let rig = rig();
        let order_ids = paid_session(&rig, 1).await;

        let err = rig
            .shipping
            .ship_single_order(&Principal::admin("usr_admin"), &order_ids[0])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_already_consolidated_order_rejected() {
        let rig = rig();
        let order_ids = paid_session(&rig, 1).await;
        mark_all_ready(&rig, &order_ids).await;
        rig.shipping
            .ship_single_order(&Principal::admin("usr_admin"), &order_ids[0])
            .await
            .unwrap();

        let err = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids: order_ids.clone(),
                    override_incomplete: false,
                    override_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_deliver_shipment_marks_members() {
        let rig = rig();
        let order_ids = paid_session(&rig, 2).await;
        mark_all_ready(&rig, &order_ids).await;
        let shipment = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids: order_ids.clone(),
                    override_incomplete: false,
                    override_reason: None,
                },
            )
            .await
            .unwrap();

        let delivered = rig
            .shipping
            .deliver_shipment(&Principal::admin("usr_admin"), &shipment.id)
            .await
            .unwrap();
        assert_eq!(delivered.len(), 2);
        for order_id in &order_ids {
            assert_eq!(
                rig.store.order(order_id).unwrap().status,
                OrderStatus::Delivered
            );
        }
    }

    #[tokio::test]
    async fn test_mixed_destinations_rejected() {
        let rig = rig();
        let mut order_ids = paid_session(&rig, 1).await;
        order_ids.extend(paid_session_to(&rig, 1, other_address()).await);
        mark_all_ready(&rig, &order_ids).await;

        let err = rig
            .shipping
            .consolidate(
                &Principal::admin("usr_admin"),
                ConsolidateInput {
                    order_ids,
                    override_incomplete: false,
                    override_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_non_admin_cannot_consolidate() {
        let rig = rig();
        let principal = Principal::new("usr_seller", Role::Seller);
        let err = rig
            .shipping
            .consolidate(
                &principal,
                ConsolidateInput {
                    order_ids: vec!["ord_1".into()],
                    override_incomplete: false,
                    override_reason: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }
}
