//! End-to-end flow: design approval gates the quote, the quote gates
//! checkout, the webhook funds escrow, consolidation ships, release
//! pays the seller, and a return claws part of it back.

use std::sync::Arc;

use rust_decimal::Decimal;

use market_engine::carrier::{CarrierClient, StubCarrier};
use market_engine::config::EngineConfig;
use market_engine::db::EntityStore;
use market_engine::gateway::{WebhookEvent, WebhookStatus};
use market_engine::notify::{MemorySink, NotificationSink};
use market_engine::MarketEngine;

use shared::models::{
    CartAddInput, CheckoutInput, ConsolidateInput, DesignContext, DesignFileInput, ItemRef,
    OrderStatus, PaymentMethod, ReturnParent, SendQuoteInput, ShippingAddress, SubmitDesignInput,
    SubmitReturnInput, TransactionStatus,
};
use shared::util::now_millis;
use shared::{new_id, Principal};

struct World {
    store: EntityStore,
    sink: Arc<MemorySink>,
    engine: MarketEngine,
    buyer: Principal,
    seller_a: Principal,
    seller_b: Principal,
    admin: Principal,
}

fn world() -> World {
    market_engine::logging::init();
    let store = EntityStore::open_in_memory().unwrap();
    let sink = MemorySink::new();
    let engine = MarketEngine::new(
        EngineConfig::default(),
        store.clone(),
        sink.clone() as Arc<dyn NotificationSink>,
        Arc::new(StubCarrier::new()) as Arc<dyn CarrierClient>,
    );

    let txn = store.begin_write().unwrap();
    for (id, name) in [
        ("usr_buyer", "Grace"),
        ("usr_seller_a", "Atelier A"),
        ("usr_seller_b", "Studio B"),
        ("usr_admin", "Ops"),
    ] {
        store
            .put_user(
                &txn,
                &shared::models::User {
                    id: id.into(),
                    display_name: name.into(),
                    created_at: now_millis(),
                },
            )
            .unwrap();
    }
    store.commit(txn).unwrap();

    World {
        store,
        sink,
        engine,
        buyer: Principal::buyer("usr_buyer"),
        seller_a: Principal::seller("usr_seller_a"),
        seller_b: Principal::seller("usr_seller_b"),
        admin: Principal::admin("usr_admin"),
    }
}

fn seed_product(
    store: &EntityStore,
    seller_id: &str,
    requires_quote: bool,
    requires_design: bool,
    price: Decimal,
    weight_grams: u32,
) -> ItemRef {
    let product_id = new_id("prd");
    let variant_id = new_id("var");
    let txn = store.begin_write().unwrap();
    store
        .put_product(
            &txn,
            &shared::models::Product {
                id: product_id.clone(),
                seller_id: seller_id.into(),
                title: "Custom piece".into(),
                requires_quote,
                requires_design,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store
        .put_variant(
            &txn,
            &shared::models::Variant {
                id: variant_id.clone(),
                product_id: product_id.clone(),
                name: "Standard".into(),
                price,
                weight_grams,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store
        .put_variant(
            &txn,
            &shared::models::Variant {
                id: new_id("var"),
                product_id: product_id.clone(),
                name: "Alt".into(),
                price: price + Decimal::new(500, 2),
                weight_grams: weight_grams + 100,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store.commit(txn).unwrap();
    ItemRef::product(product_id, Some(variant_id))
}

fn destination() -> ShippingAddress {
    ShippingAddress {
        recipient: "Grace Hopper".into(),
        line1: "1 Compiler Road".into(),
        line2: None,
        city: "Arlington".into(),
        postcode: "22201".into(),
        country: "US".into(),
    }
}

#[tokio::test]
async fn full_marketplace_lifecycle() {
    let w = world();
    let gated = seed_product(
        &w.store,
        "usr_seller_a",
        true,
        true,
        Decimal::new(8000, 2),
        1_200,
    );
    let plain = seed_product(
        &w.store,
        "usr_seller_b",
        false,
        false,
        Decimal::new(2500, 2),
        400,
    );

    // Design approval gates the quote
    let design = w
        .engine
        .designs
        .submit(
            &w.buyer,
            "cnv_a",
            SubmitDesignInput {
                context: DesignContext::Product,
                item: Some(gated.clone()),
                quote_id: None,
                files: vec![DesignFileInput {
                    name: "engraving.svg".into(),
                    url: "https://files.example.com/engraving.svg".into(),
                    size_bytes: 4096,
                    mime_type: "image/svg+xml".into(),
                }],
            },
        )
        .await
        .unwrap();
    w.engine
        .designs
        .approve(&w.seller_a, &design.id, Some("looks great".into()))
        .await
        .unwrap();

    // Quote negotiation, auto-linked to the approved design
    w.engine
        .quotes
        .request_quote(&w.buyer, "cnv_a", gated.clone(), 2)
        .await
        .unwrap();
    let quote = w
        .engine
        .quotes
        .send_quote(
            &w.seller_a,
            "cnv_a",
            "usr_buyer",
            gated.clone(),
            SendQuoteInput {
                price: "50.00".parse().unwrap(),
                quantity: 2,
                expires_at: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(quote.design_approval_id.as_deref(), Some(design.id.as_str()));
    w.engine.quotes.accept_quote(&w.buyer, &quote.id).await.unwrap();

    // Two-seller cart, one gateway checkout
    w.engine
        .cart
        .add_item(
            &w.buyer,
            CartAddInput {
                item: gated.clone(),
                quantity: 2,
                quote_id: Some(quote.id.clone()),
            },
        )
        .await
        .unwrap();
    w.engine
        .cart
        .add_item(
            &w.buyer,
            CartAddInput {
                item: plain.clone(),
                quantity: 1,
                quote_id: None,
            },
        )
        .await
        .unwrap();

    let outcome = w
        .engine
        .checkout
        .checkout(
            &w.buyer,
            CheckoutInput {
                payment_method: PaymentMethod::Gateway,
                destination: destination(),
                bank_account_id: None,
            },
        )
        .await
        .unwrap();
    let session = outcome.session().clone();
    assert_eq!(session.order_ids.len(), 2);

    let quoted_order = session
        .order_ids
        .iter()
        .map(|id| w.store.order(id).unwrap())
        .find(|o| o.quote_id.is_some())
        .unwrap();
    assert_eq!(quoted_order.unit_price.to_string(), "50.00");
    assert_eq!(quoted_order.total_amount.to_string(), "100.00");
    assert_eq!(quoted_order.status, OrderStatus::PendingPayment);

    // Gateway webhook funds escrow; the replay is a no-op
    let reference = session.gateway_reference.clone().unwrap();
    let event = WebhookEvent {
        reference,
        status: WebhookStatus::Paid,
        amount: session.grand_total,
    };
    assert_eq!(
        w.engine.escrow.handle_gateway_webhook(event.clone()).await.unwrap(),
        2
    );
    assert_eq!(w.engine.escrow.handle_gateway_webhook(event).await.unwrap(), 0);

    // Sellers pack; admin consolidates into one shipment
    for order_id in &session.order_ids {
        let order = w.store.order(order_id).unwrap();
        let seller = if order.seller_id == "usr_seller_a" {
            &w.seller_a
        } else {
            &w.seller_b
        };
        w.engine
            .orders
            .mark_ready_to_ship(seller, order_id)
            .await
            .unwrap();
    }
    let shipment = w
        .engine
        .shipping
        .consolidate(
            &w.admin,
            ConsolidateInput {
                order_ids: session.order_ids.clone(),
                override_incomplete: false,
                override_reason: None,
            },
        )
        .await
        .unwrap();
    assert!(shipment.awb_id.is_some());

    w.engine
        .shipping
        .deliver_shipment(&w.admin, &shipment.id)
        .await
        .unwrap();

    // Release the quoted order's escrow to the seller
    let released = w
        .engine
        .escrow
        .release_all_for_order(&w.admin, &quoted_order.id)
        .await
        .unwrap();
    assert_eq!(released, 1);

    // Return flow on the other (still escrowed) order
    let other_order = session
        .order_ids
        .iter()
        .map(|id| w.store.order(id).unwrap())
        .find(|o| o.quote_id.is_none())
        .unwrap();
    let request = w
        .engine
        .returns
        .buyer_submit(
            &w.buyer,
            ReturnParent::Order(other_order.id.clone()),
            SubmitReturnInput {
                reason: "wrong finish".into(),
                evidence_urls: vec![],
                requested_amount: "10.00".parse().unwrap(),
            },
        )
        .await
        .unwrap();
    w.engine
        .returns
        .seller_respond(&w.seller_b, &request.id, true, None, None)
        .await
        .unwrap();
    w.engine
        .returns
        .admin_resolve(&w.admin, &request.id, true, Some("10.00".parse().unwrap()), None)
        .await
        .unwrap();
    w.engine
        .returns
        .process_refund(&w.admin, &request.id)
        .await
        .unwrap();

    // Ledger invariants hold for every transaction in the run
    for order_id in &session.order_ids {
        let order = w.store.order(order_id).unwrap();
        assert_eq!(
            order.total_amount,
            order.unit_price * Decimal::from(order.quantity)
        );
        assert!(order.shipping_cost >= Decimal::ZERO);
        for t in w.store.transactions_for_parent(order_id).unwrap() {
            assert_eq!(t.amount, t.seller_payout + t.commission_amount);
        }
    }
    let refunded = &w.store.transactions_for_parent(&other_order.id).unwrap()[0];
    assert_eq!(refunded.status, TransactionStatus::Refunded);
    assert_eq!(refunded.refunded_amount, Some("10.00".parse().unwrap()));

    // Shipped orders always trace back to a shipment
    for order_id in &session.order_ids {
        let order = w.store.order(order_id).unwrap();
        assert_eq!(order.shipment_id.as_deref(), Some(shipment.id.as_str()));
    }

    // Something was actually delivered to users along the way
    assert!(!w.sink.events().is_empty());
}

#[tokio::test]
async fn engine_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("market.redb");

    let order_count = {
        let store = EntityStore::open(&path).unwrap();
        let txn = store.begin_write().unwrap();
        store
            .put_user(
                &txn,
                &shared::models::User {
                    id: "usr_1".into(),
                    display_name: "Persistent".into(),
                    created_at: now_millis(),
                },
            )
            .unwrap();
        store.commit(txn).unwrap();
        store.user_opt("usr_1").unwrap().is_some()
    };
    assert!(order_count);

    // Reopen: the row survived
    let store = EntityStore::open(&path).unwrap();
    assert!(store.user_opt("usr_1").unwrap().is_some());
}
