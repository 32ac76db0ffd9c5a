//! Checkout orchestrator.
//!
//! Converts a buyer's cart into one order/booking per line plus one
//! pending transaction each, inside a single write transaction. Every
//! purchase requirement and every referenced quote is re-read and
//! re-validated inside that scope; any failure aborts the whole
//! checkout, so partial orders can never exist and the cart survives
//! untouched.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;

use shared::models::{
    Booking, BookingStatus, CheckoutInput, CheckoutSession, ItemRef, Order, OrderStatus,
    PaymentMethod, RequirementReason, Transaction, TransactionParent, TransactionStatus,
};
use shared::notify::{NotificationEvent, NotificationKind};
use shared::util::now_millis;
use shared::{new_id, EngineError, EngineResult, Id, Principal, Role};
use validator::Validate;

use crate::config::EngineConfig;
use crate::db::{EntityStore, GatewayRefTarget};
use crate::gateway::{new_payment_reference, redirect_for, RedirectDescriptor};
use crate::money;
use crate::notify::{emit, NotificationSink};
use crate::purchase::{can_purchase, find_accepted_quote, find_approved_design};

/// What the caller does next after a successful checkout.
#[derive(Debug)]
pub enum CheckoutOutcome {
    /// Bank transfer: transactions stay pending until admin confirms
    /// against the uploaded slip.
    Completed { session: CheckoutSession },
    /// Online gateway: redirect the buyer; confirmation arrives via
    /// webhook.
    RedirectToGateway {
        session: CheckoutSession,
        redirect: RedirectDescriptor,
    },
}

impl CheckoutOutcome {
    pub fn session(&self) -> &CheckoutSession {
        match self {
            Self::Completed { session } => session,
            Self::RedirectToGateway { session, .. } => session,
        }
    }
}

/// Internal per-line plan accumulated before any row is written.
struct LinePlan {
    seller_id: Id,
    item: ItemRef,
    quantity: u32,
    unit_price: Decimal,
    quote_id: Option<Id>,
    design_approval_id: Option<Id>,
    /// Products only; zero for service packages.
    weight_grams: u32,
}

pub struct CheckoutManager {
    store: EntityStore,
    sink: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl CheckoutManager {
    pub fn new(store: EntityStore, sink: Arc<dyn NotificationSink>, config: EngineConfig) -> Self {
        Self {
            store,
            sink,
            config,
        }
    }

    pub async fn checkout(
        &self,
        principal: &Principal,
        input: CheckoutInput,
    ) -> EngineResult<CheckoutOutcome> {
        principal.require_role(Role::Buyer)?;
        input.validate()?;
        if input.payment_method == PaymentMethod::BankTransfer && input.bank_account_id.is_none() {
            return Err(EngineError::validation(
                "bank-transfer checkout requires a bank account",
            ));
        }

        let now = now_millis();
        let txn = self.store.begin_write()?;

        self.store.user_txn(&txn, &principal.id)?;
        let cart = self.store.cart_txn(&txn, &principal.id, now)?;
        if cart.items.is_empty() {
            return Err(EngineError::validation("cart is empty"));
        }

        // Requirement state is re-read inside this scope; an earlier UI
        // check proves nothing by now.
        let buyer_quotes = self.store.quotes_for_buyer_txn(&txn, &principal.id)?;
        let buyer_designs = self.store.designs_for_buyer_txn(&txn, &principal.id)?;

        let mut plans: Vec<LinePlan> = Vec::with_capacity(cart.items.len());
        for line in &cart.items {
            let gating = self.store.gating_for_item_txn(&txn, &line.item)?;

            let decision = can_purchase(
                &gating,
                &line.item,
                line.quantity,
                &buyer_quotes,
                &buyer_designs,
                now,
            );
            if !decision.allowed {
                return Err(EngineError::RequirementNotMet {
                    reasons: decision.reasons,
                });
            }

            // Re-fetch the referenced quote and reject the whole checkout
            // on any drift
            let quote = match &line.quote_id {
                Some(quote_id) => {
                    let quote = self.store.quote_txn(&txn, quote_id)?;
                    principal.require_self(&quote.buyer_id, "quote")?;
                    if !quote.item.covers(&line.item) {
                        return Err(EngineError::validation(
                            "quote does not cover the cart line's item",
                        ));
                    }
                    match quote.effective_status(now) {
                        shared::models::QuoteStatus::Accepted => {}
                        shared::models::QuoteStatus::Expired => {
                            return Err(EngineError::RequirementNotMet {
                                reasons: vec![RequirementReason::QuoteExpired],
                            });
                        }
                        _ => {
                            return Err(EngineError::RequirementNotMet {
                                reasons: vec![RequirementReason::QuoteNotAccepted],
                            });
                        }
                    }
                    if quote.quantity != line.quantity {
                        return Err(EngineError::RequirementNotMet {
                            reasons: vec![RequirementReason::QuoteQuantityMismatch],
                        });
                    }
                    Some(quote)
                }
                None if gating.requires_quote => {
                    find_accepted_quote(&buyer_quotes, &line.item, line.quantity, now).cloned()
                }
                None => None,
            };

            let (unit_price, weight_grams) = match &line.item {
                ItemRef::Product { variant_id, .. } => {
                    let variant_id = variant_id.as_ref().ok_or_else(|| {
                        EngineError::validation("cart line lost its variant binding")
                    })?;
                    let variant = self.store.variant_txn(&txn, variant_id)?;
                    let price = match &quote {
                        Some(q) => q.quoted_price.ok_or_else(|| {
                            EngineError::validation("accepted quote carries no price")
                        })?,
                        None => variant.price,
                    };
                    (price, variant.weight_grams * line.quantity)
                }
                ItemRef::Service { package_id, .. } => {
                    let package_id = package_id.as_ref().ok_or_else(|| {
                        EngineError::validation("cart line lost its package binding")
                    })?;
                    let package = self.store.package_txn(&txn, package_id)?;
                    let price = match &quote {
                        Some(q) => q.quoted_price.ok_or_else(|| {
                            EngineError::validation("accepted quote carries no price")
                        })?,
                        None => package.price,
                    };
                    (price, 0)
                }
            };
            money::validate_price(unit_price, "unit price")?;

            let design_approval_id = match &quote {
                Some(q) if q.design_approval_id.is_some() => q.design_approval_id.clone(),
                _ if gating.requires_design => {
                    find_approved_design(&buyer_designs, &line.item, gating.single_config)
                        .map(|d| d.id.clone())
                }
                _ => None,
            };

            plans.push(LinePlan {
                seller_id: gating.seller_id,
                item: line.item.clone(),
                quantity: line.quantity,
                unit_price,
                quote_id: quote.map(|q| q.id),
                design_approval_id,
                weight_grams,
            });
        }

        // Shipping is computed once across the whole checkout, then
        // distributed by weight share over the product lines.
        let product_weights: Vec<u32> = plans
            .iter()
            .filter(|p| p.item.is_product())
            .map(|p| p.weight_grams)
            .collect();
        let total_weight: u64 = product_weights.iter().map(|w| *w as u64).sum();
        let shipping_total = if product_weights.is_empty() {
            Decimal::ZERO
        } else {
            money::shipping_cost(
                self.config.shipping_base,
                self.config.shipping_per_kg,
                total_weight,
            )
        };
        let mut shipping_shares = money::distribute_shipping(shipping_total, &product_weights);

        let session_id = new_id("cs");
        let gateway_reference = match input.payment_method {
            PaymentMethod::Gateway => Some(new_payment_reference()),
            PaymentMethod::BankTransfer => None,
        };

        let mut order_ids = Vec::new();
        let mut booking_ids = Vec::new();
        let mut items_subtotal = Decimal::ZERO;
        let mut notifications = Vec::new();

        for plan in &plans {
            let total_amount = money::line_total(plan.unit_price, plan.quantity);
            items_subtotal += total_amount;

            match &plan.item {
                ItemRef::Product {
                    product_id,
                    variant_id,
                } => {
                    let variant_id = variant_id
                        .clone()
                        .ok_or_else(|| EngineError::validation("cart line lost its variant binding"))?;
                    let shipping_cost = shipping_shares.remove(0);
                    let order = Order {
                        id: new_id("ord"),
                        session_id: session_id.clone(),
                        buyer_id: principal.id.clone(),
                        seller_id: plan.seller_id.clone(),
                        product_id: product_id.clone(),
                        variant_id,
                        quantity: plan.quantity,
                        unit_price: plan.unit_price,
                        total_amount,
                        shipping_cost,
                        shipping_weight_grams: plan.weight_grams,
                        quote_id: plan.quote_id.clone(),
                        design_approval_id: plan.design_approval_id.clone(),
                        status: OrderStatus::PendingPayment,
                        ready_to_ship: false,
                        shipment_id: None,
                        return_attempt_count: 0,
                        destination: input.destination.clone(),
                        created_at: now,
                        updated_at: now,
                    };
                    self.store.put_order(&txn, &order)?;

                    let transaction = self.build_transaction(
                        TransactionParent::Order(order.id.clone()),
                        &principal.id,
                        &plan.seller_id,
                        total_amount,
                        shipping_cost,
                        gateway_reference.clone(),
                        input.bank_account_id.clone(),
                        now,
                    );
                    self.store.put_transaction(&txn, &transaction)?;

                    notifications.push(NotificationEvent::new(
                        plan.seller_id.clone(),
                        NotificationKind::OrderPlaced,
                        "New order",
                        format!("Order {} awaiting payment", order.id),
                        json!({ "order_id": order.id, "session_id": session_id }),
                    ));
                    order_ids.push(order.id);
                }
                ItemRef::Service {
                    service_id,
                    package_id,
                } => {
                    let package_id = package_id
                        .clone()
                        .ok_or_else(|| EngineError::validation("cart line lost its package binding"))?;
                    let booking = Booking {
                        id: new_id("bkg"),
                        session_id: session_id.clone(),
                        buyer_id: principal.id.clone(),
                        seller_id: plan.seller_id.clone(),
                        service_id: service_id.clone(),
                        package_id,
                        quantity: plan.quantity,
                        unit_price: plan.unit_price,
                        total_amount,
                        quote_id: plan.quote_id.clone(),
                        design_approval_id: plan.design_approval_id.clone(),
                        status: BookingStatus::PendingPayment,
                        created_at: now,
                        updated_at: now,
                    };
                    self.store.put_booking(&txn, &booking)?;

                    let transaction = self.build_transaction(
                        TransactionParent::Booking(booking.id.clone()),
                        &principal.id,
                        &plan.seller_id,
                        total_amount,
                        Decimal::ZERO,
                        gateway_reference.clone(),
                        input.bank_account_id.clone(),
                        now,
                    );
                    self.store.put_transaction(&txn, &transaction)?;

                    notifications.push(NotificationEvent::new(
                        plan.seller_id.clone(),
                        NotificationKind::OrderPlaced,
                        "New booking",
                        format!("Booking {} awaiting payment", booking.id),
                        json!({ "booking_id": booking.id, "session_id": session_id }),
                    ));
                    booking_ids.push(booking.id);
                }
            }
        }

        let session = CheckoutSession {
            id: session_id.clone(),
            buyer_id: principal.id.clone(),
            payment_method: input.payment_method,
            order_ids,
            booking_ids,
            items_subtotal,
            shipping_total,
            grand_total: items_subtotal + shipping_total,
            gateway_reference: gateway_reference.clone(),
            created_at: now,
        };
        self.store.put_session(&txn, &session)?;
        if let Some(reference) = &gateway_reference {
            self.store
                .put_gateway_ref(&txn, reference, &GatewayRefTarget::Session(session.id.clone()))?;
        }

        // Cart clear rides in the same scope: commit is all-or-nothing
        self.store
            .put_cart(&txn, &shared::models::Cart::empty(&principal.id, now))?;
        self.store.commit(txn)?;

        tracing::info!(
            session_id = %session.id,
            orders = session.order_ids.len(),
            bookings = session.booking_ids.len(),
            grand_total = %session.grand_total,
            "checkout committed"
        );

        notifications.push(NotificationEvent::new(
            principal.id.clone(),
            NotificationKind::OrderPlaced,
            "Checkout complete",
            format!("Your checkout of {} item(s) was created", plans.len()),
            json!({ "session_id": session.id }),
        ));
        for event in notifications {
            emit(&self.sink, event).await;
        }

        match gateway_reference {
            Some(reference) => {
                let redirect =
                    redirect_for(&self.config.gateway_base_url, &reference, session.grand_total);
                Ok(CheckoutOutcome::RedirectToGateway { session, redirect })
            }
            None => Ok(CheckoutOutcome::Completed { session }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_transaction(
        &self,
        parent: TransactionParent,
        buyer_id: &str,
        seller_id: &str,
        merchandise_amount: Decimal,
        shipping_cost: Decimal,
        gateway_reference: Option<String>,
        bank_account_id: Option<Id>,
        now: i64,
    ) -> Transaction {
        // Commission applies to merchandise; shipping passes through to
        // the seller untouched.
        let (commission_amount, merchandise_payout) =
            money::commission_split(merchandise_amount, self.config.commission_rate);
        let amount = merchandise_amount + shipping_cost;
        Transaction {
            id: new_id("txn"),
            parent,
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            amount,
            commission_rate: self.config.commission_rate,
            commission_amount,
            seller_payout: merchandise_payout + shipping_cost,
            status: TransactionStatus::Pending,
            gateway_reference,
            bank_account_id,
            payment_slip_url: None,
            refunded_amount: None,
            escrowed_at: None,
            released_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
