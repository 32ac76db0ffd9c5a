//! redb-backed entity store.
//!
//! # Tables
//!
//! One table per entity, keyed by id, values JSON-serialized. The store
//! hands out raw `WriteTransaction`s: an orchestrator opens one scope,
//! re-reads every dependent entity through the `*_txn` accessors, writes
//! all rows, and commits once. A dropped transaction aborts, so partial
//! writes are never observable.
//!
//! `gateway_refs` is a secondary index mapping a payment reference to
//! the checkout session or transaction it settles, for webhook lookup.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shared::models::{
    Booking, BoostPurchase, Cart, CheckoutSession, DesignApproval, Order, Package, Product, Quote,
    ReturnRequest, Service, Shipment, Transaction, User, Variant,
};
use shared::{EngineError, EngineResult, Id};

const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
const PRODUCTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("products");
const VARIANTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("variants");
const SERVICES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("services");
const PACKAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("packages");
const QUOTES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("quotes");
const DESIGNS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("design_approvals");
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const BOOKINGS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("bookings");
const TRANSACTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transactions");
const RETURNS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("return_requests");
const SHIPMENTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("shipments");
const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("checkout_sessions");
const CARTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("carts");
const BOOSTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("boost_purchases");
const GATEWAY_REFS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("gateway_refs");

const ALL_TABLES: &[TableDefinition<&str, &[u8]>] = &[
    USERS_TABLE,
    PRODUCTS_TABLE,
    VARIANTS_TABLE,
    SERVICES_TABLE,
    PACKAGES_TABLE,
    QUOTES_TABLE,
    DESIGNS_TABLE,
    ORDERS_TABLE,
    BOOKINGS_TABLE,
    TRANSACTIONS_TABLE,
    RETURNS_TABLE,
    SHIPMENTS_TABLE,
    SESSIONS_TABLE,
    CARTS_TABLE,
    BOOSTS_TABLE,
    GATEWAY_REFS_TABLE,
];

/// What a gateway payment reference settles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GatewayRefTarget {
    /// A whole checkout session (all of its pending transactions).
    Session(Id),
    /// A single transaction (boost purchases).
    Transaction(Id),
}

/// Storage errors. Surface to callers as [`EngineError::Storage`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "entity store failure");
        EngineError::Storage(err.to_string())
    }
}

/// Entity store backed by redb.
#[derive(Clone)]
pub struct EntityStore {
    db: Arc<Database>,
}

impl EntityStore {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let db = Database::create(path).map_err(StoreError::from)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Open an in-memory database (tests and local development).
    pub fn open_in_memory() -> EngineResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(StoreError::from)?;
        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> EngineResult<()> {
        let txn = self.begin_write()?;
        for def in ALL_TABLES {
            let _ = txn.open_table(*def).map_err(StoreError::from)?;
        }
        txn.commit().map_err(StoreError::from)?;
        Ok(())
    }

    /// Begin a write transaction (the unit-of-work scope).
    pub fn begin_write(&self) -> EngineResult<WriteTransaction> {
        Ok(self.db.begin_write().map_err(StoreError::from)?)
    }

    /// Commit a write transaction.
    pub fn commit(&self, txn: WriteTransaction) -> EngineResult<()> {
        txn.commit().map_err(StoreError::from)?;
        Ok(())
    }

    // ========== Generic helpers ==========

    fn put_raw<T: Serialize>(
        &self,
        txn: &WriteTransaction,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> EngineResult<()> {
        let mut table = txn.open_table(def).map_err(StoreError::from)?;
        let bytes = serde_json::to_vec(value).map_err(StoreError::from)?;
        table
            .insert(key, bytes.as_slice())
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn get_raw_txn<T: DeserializeOwned>(
        &self,
        txn: &WriteTransaction,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> EngineResult<Option<T>> {
        let table = txn.open_table(def).map_err(StoreError::from)?;
        let result = match table.get(key).map_err(StoreError::from)? {
            Some(value) => Ok(Some(
                serde_json::from_slice(value.value()).map_err(StoreError::from)?,
            )),
            None => Ok(None),
        };
        result
    }

    fn get_raw<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> EngineResult<Option<T>> {
        let read_txn = self.db.begin_read().map_err(StoreError::from)?;
        let table = read_txn.open_table(def).map_err(StoreError::from)?;
        match table.get(key).map_err(StoreError::from)? {
            Some(value) => Ok(Some(
                serde_json::from_slice(value.value()).map_err(StoreError::from)?,
            )),
            None => Ok(None),
        }
    }

    fn scan_where<T: DeserializeOwned>(
        &self,
        def: TableDefinition<&str, &[u8]>,
        pred: impl Fn(&T) -> bool,
    ) -> EngineResult<Vec<T>> {
        let read_txn = self.db.begin_read().map_err(StoreError::from)?;
        let table = read_txn.open_table(def).map_err(StoreError::from)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(StoreError::from)? {
            let (_key, value) = row.map_err(StoreError::from)?;
            let entity: T = serde_json::from_slice(value.value()).map_err(StoreError::from)?;
            if pred(&entity) {
                out.push(entity);
            }
        }
        Ok(out)
    }

    fn scan_where_txn<T: DeserializeOwned>(
        &self,
        txn: &WriteTransaction,
        def: TableDefinition<&str, &[u8]>,
        pred: impl Fn(&T) -> bool,
    ) -> EngineResult<Vec<T>> {
        let table = txn.open_table(def).map_err(StoreError::from)?;
        let mut out = Vec::new();
        for row in table.iter().map_err(StoreError::from)? {
            let (_key, value) = row.map_err(StoreError::from)?;
            let entity: T = serde_json::from_slice(value.value()).map_err(StoreError::from)?;
            if pred(&entity) {
                out.push(entity);
            }
        }
        Ok(out)
    }

    fn require<T>(value: Option<T>, entity: &'static str, id: &str) -> EngineResult<T> {
        value.ok_or_else(|| EngineError::not_found(entity, id))
    }

    // ========== Users ==========

    pub fn put_user(&self, txn: &WriteTransaction, user: &User) -> EngineResult<()> {
        self.put_raw(txn, USERS_TABLE, &user.id, user)
    }

    pub fn user_opt(&self, id: &str) -> EngineResult<Option<User>> {
        self.get_raw(USERS_TABLE, id)
    }

    pub fn user_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<User> {
        Self::require(self.get_raw_txn(txn, USERS_TABLE, id)?, "user", id)
    }

    // ========== Catalog ==========

    pub fn put_product(&self, txn: &WriteTransaction, product: &Product) -> EngineResult<()> {
        self.put_raw(txn, PRODUCTS_TABLE, &product.id, product)
    }

    pub fn product_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Product> {
        Self::require(self.get_raw_txn(txn, PRODUCTS_TABLE, id)?, "product", id)
    }

    pub fn put_variant(&self, txn: &WriteTransaction, variant: &Variant) -> EngineResult<()> {
        self.put_raw(txn, VARIANTS_TABLE, &variant.id, variant)
    }

    pub fn variant_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Variant> {
        Self::require(self.get_raw_txn(txn, VARIANTS_TABLE, id)?, "variant", id)
    }

    pub fn variants_for_product(&self, product_id: &str) -> EngineResult<Vec<Variant>> {
        self.scan_where(VARIANTS_TABLE, |v: &Variant| v.product_id == product_id)
    }

    pub fn variants_for_product_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
    ) -> EngineResult<Vec<Variant>> {
        self.scan_where_txn(txn, VARIANTS_TABLE, |v: &Variant| v.product_id == product_id)
    }

    pub fn put_service(&self, txn: &WriteTransaction, service: &Service) -> EngineResult<()> {
        self.put_raw(txn, SERVICES_TABLE, &service.id, service)
    }

    pub fn service_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Service> {
        Self::require(self.get_raw_txn(txn, SERVICES_TABLE, id)?, "service", id)
    }

    pub fn put_package(&self, txn: &WriteTransaction, package: &Package) -> EngineResult<()> {
        self.put_raw(txn, PACKAGES_TABLE, &package.id, package)
    }

    pub fn package_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Package> {
        Self::require(self.get_raw_txn(txn, PACKAGES_TABLE, id)?, "package", id)
    }

    // ========== Quotes ==========

    pub fn put_quote(&self, txn: &WriteTransaction, quote: &Quote) -> EngineResult<()> {
        self.put_raw(txn, QUOTES_TABLE, &quote.id, quote)
    }

    pub fn quote(&self, id: &str) -> EngineResult<Quote> {
        Self::require(self.get_raw(QUOTES_TABLE, id)?, "quote", id)
    }

    pub fn quote_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Quote> {
        Self::require(self.get_raw_txn(txn, QUOTES_TABLE, id)?, "quote", id)
    }

    pub fn quotes_for_conversation_txn(
        &self,
        txn: &WriteTransaction,
        conversation_id: &str,
    ) -> EngineResult<Vec<Quote>> {
        self.scan_where_txn(txn, QUOTES_TABLE, |q: &Quote| {
            q.conversation_id == conversation_id
        })
    }

    pub fn quotes_for_buyer_txn(
        &self,
        txn: &WriteTransaction,
        buyer_id: &str,
    ) -> EngineResult<Vec<Quote>> {
        self.scan_where_txn(txn, QUOTES_TABLE, |q: &Quote| q.buyer_id == buyer_id)
    }

    // ========== Design approvals ==========

    pub fn put_design(&self, txn: &WriteTransaction, design: &DesignApproval) -> EngineResult<()> {
        self.put_raw(txn, DESIGNS_TABLE, &design.id, design)
    }

    pub fn design(&self, id: &str) -> EngineResult<DesignApproval> {
        Self::require(self.get_raw(DESIGNS_TABLE, id)?, "design approval", id)
    }

    pub fn design_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<DesignApproval> {
        Self::require(
            self.get_raw_txn(txn, DESIGNS_TABLE, id)?,
            "design approval",
            id,
        )
    }

    pub fn designs_for_conversation(
        &self,
        conversation_id: &str,
    ) -> EngineResult<Vec<DesignApproval>> {
        self.scan_where(DESIGNS_TABLE, |d: &DesignApproval| {
            d.conversation_id == conversation_id
        })
    }

    pub fn designs_for_conversation_txn(
        &self,
        txn: &WriteTransaction,
        conversation_id: &str,
    ) -> EngineResult<Vec<DesignApproval>> {
        self.scan_where_txn(txn, DESIGNS_TABLE, |d: &DesignApproval| {
            d.conversation_id == conversation_id
        })
    }

    pub fn designs_for_buyer_txn(
        &self,
        txn: &WriteTransaction,
        buyer_id: &str,
    ) -> EngineResult<Vec<DesignApproval>> {
        self.scan_where_txn(txn, DESIGNS_TABLE, |d: &DesignApproval| {
            d.buyer_id == buyer_id
        })
    }

    // ========== Orders / bookings ==========

    pub fn put_order(&self, txn: &WriteTransaction, order: &Order) -> EngineResult<()> {
        self.put_raw(txn, ORDERS_TABLE, &order.id, order)
    }

    pub fn order(&self, id: &str) -> EngineResult<Order> {
        Self::require(self.get_raw(ORDERS_TABLE, id)?, "order", id)
    }

    pub fn order_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Order> {
        Self::require(self.get_raw_txn(txn, ORDERS_TABLE, id)?, "order", id)
    }

    pub fn orders_for_buyer(&self, buyer_id: &str) -> EngineResult<Vec<Order>> {
        self.scan_where(ORDERS_TABLE, |o: &Order| o.buyer_id == buyer_id)
    }

    pub fn put_booking(&self, txn: &WriteTransaction, booking: &Booking) -> EngineResult<()> {
        self.put_raw(txn, BOOKINGS_TABLE, &booking.id, booking)
    }

    pub fn booking(&self, id: &str) -> EngineResult<Booking> {
        Self::require(self.get_raw(BOOKINGS_TABLE, id)?, "booking", id)
    }

    pub fn booking_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Booking> {
        Self::require(self.get_raw_txn(txn, BOOKINGS_TABLE, id)?, "booking", id)
    }

    // ========== Transactions ==========

    pub fn put_transaction(
        &self,
        txn: &WriteTransaction,
        transaction: &Transaction,
    ) -> EngineResult<()> {
        self.put_raw(txn, TRANSACTIONS_TABLE, &transaction.id, transaction)
    }

    pub fn transaction(&self, id: &str) -> EngineResult<Transaction> {
        Self::require(self.get_raw(TRANSACTIONS_TABLE, id)?, "transaction", id)
    }

    pub fn transaction_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Transaction> {
        Self::require(
            self.get_raw_txn(txn, TRANSACTIONS_TABLE, id)?,
            "transaction",
            id,
        )
    }

    pub fn transactions_for_parent(&self, parent_id: &str) -> EngineResult<Vec<Transaction>> {
        self.scan_where(TRANSACTIONS_TABLE, |t: &Transaction| {
            t.parent.parent_id() == parent_id
        })
    }

    pub fn transactions_for_parent_txn(
        &self,
        txn: &WriteTransaction,
        parent_id: &str,
    ) -> EngineResult<Vec<Transaction>> {
        self.scan_where_txn(txn, TRANSACTIONS_TABLE, |t: &Transaction| {
            t.parent.parent_id() == parent_id
        })
    }

    // ========== Return requests ==========

    pub fn put_return(&self, txn: &WriteTransaction, request: &ReturnRequest) -> EngineResult<()> {
        self.put_raw(txn, RETURNS_TABLE, &request.id, request)
    }

    pub fn return_request(&self, id: &str) -> EngineResult<ReturnRequest> {
        Self::require(self.get_raw(RETURNS_TABLE, id)?, "return request", id)
    }

    pub fn return_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<ReturnRequest> {
        Self::require(self.get_raw_txn(txn, RETURNS_TABLE, id)?, "return request", id)
    }

    pub fn returns_for_parent_txn(
        &self,
        txn: &WriteTransaction,
        parent_id: &str,
    ) -> EngineResult<Vec<ReturnRequest>> {
        self.scan_where_txn(txn, RETURNS_TABLE, |r: &ReturnRequest| {
            r.parent.parent_id() == parent_id
        })
    }

    // ========== Shipments ==========

    pub fn put_shipment(&self, txn: &WriteTransaction, shipment: &Shipment) -> EngineResult<()> {
        self.put_raw(txn, SHIPMENTS_TABLE, &shipment.id, shipment)
    }

    pub fn shipment(&self, id: &str) -> EngineResult<Shipment> {
        Self::require(self.get_raw(SHIPMENTS_TABLE, id)?, "shipment", id)
    }

    pub fn shipment_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<Shipment> {
        Self::require(self.get_raw_txn(txn, SHIPMENTS_TABLE, id)?, "shipment", id)
    }

    // ========== Checkout sessions / carts ==========

    pub fn put_session(
        &self,
        txn: &WriteTransaction,
        session: &CheckoutSession,
    ) -> EngineResult<()> {
        self.put_raw(txn, SESSIONS_TABLE, &session.id, session)
    }

    pub fn session(&self, id: &str) -> EngineResult<CheckoutSession> {
        Self::require(self.get_raw(SESSIONS_TABLE, id)?, "checkout session", id)
    }

    pub fn session_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<CheckoutSession> {
        Self::require(
            self.get_raw_txn(txn, SESSIONS_TABLE, id)?,
            "checkout session",
            id,
        )
    }

    pub fn put_cart(&self, txn: &WriteTransaction, cart: &Cart) -> EngineResult<()> {
        self.put_raw(txn, CARTS_TABLE, &cart.buyer_id, cart)
    }

    /// A buyer with no stored cart has an empty one.
    pub fn cart(&self, buyer_id: &str, now: i64) -> EngineResult<Cart> {
        Ok(self
            .get_raw(CARTS_TABLE, buyer_id)?
            .unwrap_or_else(|| Cart::empty(buyer_id, now)))
    }

    pub fn cart_txn(&self, txn: &WriteTransaction, buyer_id: &str, now: i64) -> EngineResult<Cart> {
        Ok(self
            .get_raw_txn(txn, CARTS_TABLE, buyer_id)?
            .unwrap_or_else(|| Cart::empty(buyer_id, now)))
    }

    // ========== Boost purchases ==========

    pub fn put_boost(&self, txn: &WriteTransaction, boost: &BoostPurchase) -> EngineResult<()> {
        self.put_raw(txn, BOOSTS_TABLE, &boost.id, boost)
    }

    pub fn boost(&self, id: &str) -> EngineResult<BoostPurchase> {
        Self::require(self.get_raw(BOOSTS_TABLE, id)?, "boost purchase", id)
    }

    pub fn boost_txn(&self, txn: &WriteTransaction, id: &str) -> EngineResult<BoostPurchase> {
        Self::require(self.get_raw_txn(txn, BOOSTS_TABLE, id)?, "boost purchase", id)
    }

    // ========== Gating resolution ==========

    /// Resolve the gating facts for an item reference, verifying that
    /// the listing (and pinned configuration, if any) exists and belongs
    /// together. The single-configuration fallback only applies to
    /// products.
    pub fn gating_for_item_txn(
        &self,
        txn: &WriteTransaction,
        item: &shared::models::ItemRef,
    ) -> EngineResult<crate::purchase::ItemGating> {
        use shared::models::ItemRef;
        match item {
            ItemRef::Product {
                product_id,
                variant_id,
            } => {
                let product = self.product_txn(txn, product_id)?;
                if let Some(variant_id) = variant_id {
                    let variant = self.variant_txn(txn, variant_id)?;
                    if variant.product_id != *product_id {
                        return Err(EngineError::validation(format!(
                            "variant {} does not belong to product {}",
                            variant_id, product_id
                        )));
                    }
                }
                let variants = self.variants_for_product_txn(txn, product_id)?;
                Ok(crate::purchase::ItemGating {
                    seller_id: product.seller_id,
                    requires_quote: product.requires_quote,
                    requires_design: product.requires_design,
                    single_config: variants.len() == 1,
                })
            }
            ItemRef::Service {
                service_id,
                package_id,
            } => {
                let service = self.service_txn(txn, service_id)?;
                if let Some(package_id) = package_id {
                    let package = self.package_txn(txn, package_id)?;
                    if package.service_id != *service_id {
                        return Err(EngineError::validation(format!(
                            "package {} does not belong to service {}",
                            package_id, service_id
                        )));
                    }
                }
                Ok(crate::purchase::ItemGating {
                    seller_id: service.seller_id,
                    requires_quote: service.requires_quote,
                    requires_design: service.requires_design,
                    single_config: false,
                })
            }
        }
    }

    // ========== Gateway reference index ==========

    pub fn put_gateway_ref(
        &self,
        txn: &WriteTransaction,
        reference: &str,
        target: &GatewayRefTarget,
    ) -> EngineResult<()> {
        self.put_raw(txn, GATEWAY_REFS_TABLE, reference, target)
    }

    pub fn gateway_ref(&self, reference: &str) -> EngineResult<GatewayRefTarget> {
        Self::require(
            self.get_raw(GATEWAY_REFS_TABLE, reference)?,
            "payment reference",
            reference,
        )
    }
}
