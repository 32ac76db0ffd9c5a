//! Marketplace transaction engine.
//!
//! Five coupled state machines (quote, design approval, order/booking,
//! escrow transaction, return request) plus the two multi-entity
//! orchestrators (checkout, shipment consolidation) over a redb entity
//! store. Every multi-row mutation runs inside one write transaction;
//! external collaborators (notifications, carrier, payment gateway) are
//! consumed through the narrow traits in [`notify`], [`carrier`] and
//! [`gateway`] and never called while a transaction is open.

pub mod boost;
pub mod carrier;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod db;
pub mod designs;
pub mod escrow;
pub mod gateway;
pub mod logging;
pub mod money;
pub mod notify;
pub mod orders;
pub mod purchase;
pub mod quotes;
pub mod returns;
pub mod shipping;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::Arc;

use crate::carrier::CarrierClient;
use crate::config::EngineConfig;
use crate::db::EntityStore;
use crate::notify::NotificationSink;

pub use crate::config::EngineConfig as Config;

/// Facade bundling all managers over one store.
pub struct MarketEngine {
    pub quotes: quotes::QuoteManager,
    pub designs: designs::DesignManager,
    pub cart: cart::CartManager,
    pub checkout: checkout::CheckoutManager,
    pub escrow: escrow::EscrowManager,
    pub orders: orders::OrderManager,
    pub shipping: shipping::ShippingManager,
    pub returns: returns::ReturnManager,
    pub boosts: boost::BoostManager,
}

impl MarketEngine {
    pub fn new(
        config: EngineConfig,
        store: EntityStore,
        sink: Arc<dyn NotificationSink>,
        carrier: Arc<dyn CarrierClient>,
    ) -> Self {
        Self {
            quotes: quotes::QuoteManager::new(store.clone(), sink.clone(), config.clone()),
            designs: designs::DesignManager::new(store.clone(), sink.clone()),
            cart: cart::CartManager::new(store.clone()),
            checkout: checkout::CheckoutManager::new(store.clone(), sink.clone(), config.clone()),
            escrow: escrow::EscrowManager::new(store.clone(), sink.clone()),
            orders: orders::OrderManager::new(store.clone(), sink.clone()),
            shipping: shipping::ShippingManager::new(store.clone(), sink.clone(), carrier),
            returns: returns::ReturnManager::new(store.clone(), sink, config.clone()),
            boosts: boost::BoostManager::new(store, config),
        }
    }
}
