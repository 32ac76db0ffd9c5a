//! Shared fixtures for unit tests.

use rust_decimal::Decimal;

use shared::models::{
    DesignApproval, DesignContext, DesignFile, DesignStatus, ItemRef, Package, Product, Service,
    ShippingAddress, User, Variant,
};
use shared::util::now_millis;
use shared::{new_id, Id};

use crate::db::EntityStore;

/// In-memory store pre-seeded with the users the tests refer to.
pub fn store_with_users() -> EntityStore {
    let store = EntityStore::open_in_memory().unwrap();
    let txn = store.begin_write().unwrap();
    for (id, name) in [
        ("usr_buyer", "Test Buyer"),
        ("usr_seller", "Test Seller"),
        ("usr_other", "Other Seller"),
        ("usr_admin", "Platform Admin"),
    ] {
        store
            .put_user(
                &txn,
                &User {
                    id: id.into(),
                    display_name: name.into(),
                    created_at: now_millis(),
                },
            )
            .unwrap();
    }
    store.commit(txn).unwrap();
    store
}

/// Product with two variants (so the single-variant fallback is off).
/// Returns (product_id, first_variant_id).
pub fn seed_product(
    store: &EntityStore,
    seller_id: &str,
    requires_quote: bool,
    requires_design: bool,
) -> (Id, Id) {
    let product_id = new_id("prd");
    let variant_id = new_id("var");
    let txn = store.begin_write().unwrap();
    store
        .put_product(
            &txn,
            &Product {
                id: product_id.clone(),
                seller_id: seller_id.into(),
                title: "Test Product".into(),
                requires_quote,
                requires_design,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store
        .put_variant(
            &txn,
            &Variant {
                id: variant_id.clone(),
                product_id: product_id.clone(),
                name: "Standard".into(),
                price: Decimal::new(2000, 2),
                weight_grams: 500,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store
        .put_variant(
            &txn,
            &Variant {
                id: new_id("var"),
                product_id: product_id.clone(),
                name: "Large".into(),
                price: Decimal::new(3000, 2),
                weight_grams: 800,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store.commit(txn).unwrap();
    (product_id, variant_id)
}

/// Service with one package. Returns (service_id, package_id).
pub fn seed_service(
    store: &EntityStore,
    seller_id: &str,
    requires_quote: bool,
    requires_design: bool,
) -> (Id, Id) {
    let service_id = new_id("svc");
    let package_id = new_id("pkg");
    let txn = store.begin_write().unwrap();
    store
        .put_service(
            &txn,
            &Service {
                id: service_id.clone(),
                seller_id: seller_id.into(),
                title: "Test Service".into(),
                requires_quote,
                requires_design,
                created_at: now_millis(),
            },
        )
        .unwrap();
    store
        .put_package(
            &txn,
            &Package {
                id: package_id.clone(),
                service_id: service_id.clone(),
                name: "Basic".into(),
                price: Decimal::new(15000, 2),
                created_at: now_millis(),
            },
        )
        .unwrap();
    store.commit(txn).unwrap();
    (service_id, package_id)
}

/// Insert an already-approved design for the given scope.
pub fn seed_approved_design(
    store: &EntityStore,
    conversation_id: &str,
    buyer_id: &str,
    seller_id: &str,
    item: ItemRef,
) -> Id {
    let id = new_id("da");
    let txn = store.begin_write().unwrap();
    store
        .put_design(
            &txn,
            &DesignApproval {
                id: id.clone(),
                conversation_id: conversation_id.into(),
                buyer_id: buyer_id.into(),
                seller_id: seller_id.into(),
                context: DesignContext::Product,
                item: Some(item),
                quote_id: None,
                files: vec![DesignFile {
                    name: "artwork.svg".into(),
                    url: "https://files.example.com/artwork.svg".into(),
                    size_bytes: 1024,
                    mime_type: "image/svg+xml".into(),
                }],
                status: DesignStatus::Approved,
                seller_notes: None,
                created_at: now_millis(),
                updated_at: now_millis(),
            },
        )
        .unwrap();
    store.commit(txn).unwrap();
    id
}

pub fn test_address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Ada Lovelace".into(),
        line1: "12 Analytical Way".into(),
        line2: None,
        city: "London".into(),
        postcode: "N1 9GU".into(),
        country: "GB".into(),
    }
}

pub fn other_address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Charles Babbage".into(),
        line1: "1 Engine Court".into(),
        line2: None,
        city: "Manchester".into(),
        postcode: "M1 1AA".into(),
        country: "GB".into(),
    }
}
