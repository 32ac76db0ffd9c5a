//! Cart management. One cart per buyer; prices are resolved at checkout
//! time inside the write scope, never snapshotted at cart-add.

use shared::models::{Cart, CartAddInput, CartItem, ItemRef, QuoteStatus};
use shared::util::now_millis;
use shared::{EngineError, EngineResult, Principal, Role};
use validator::Validate;

use crate::db::EntityStore;

pub struct CartManager {
    store: EntityStore,
}

impl CartManager {
    pub fn new(store: EntityStore) -> Self {
        Self { store }
    }

    /// Add a line (or merge into an existing line with the same item and
    /// quote binding). The line must pin a concrete variant/package.
    pub async fn add_item(&self, principal: &Principal, input: CartAddInput) -> EngineResult<Cart> {
        principal.require_role(Role::Buyer)?;
        input.validate()?;
        if input.item.config_id().is_none() {
            return Err(EngineError::validation(
                "cart lines must bind a concrete variant or package",
            ));
        }

        let now = now_millis();
        let txn = self.store.begin_write()?;
        // Listing and configuration must exist and belong together
        let _gating = self.store.gating_for_item_txn(&txn, &input.item)?;

        if let Some(quote_id) = &input.quote_id {
            let quote = self.store.quote_txn(&txn, quote_id)?;
            principal.require_self(&quote.buyer_id, "quote")?;
            if !quote.item.covers(&input.item) {
                return Err(EngineError::validation(
                    "quote does not cover the cart line's item",
                ));
            }
            if quote.effective_status(now) != QuoteStatus::Accepted {
                return Err(EngineError::validation(
                    "cart lines can only bind accepted quotes",
                ));
            }
        }

        let mut cart = self.store.cart_txn(&txn, &principal.id, now)?;
        match cart
            .items
            .iter_mut()
            .find(|line| line.item == input.item && line.quote_id == input.quote_id)
        {
            Some(line) => line.quantity = input.quantity,
            None => cart.items.push(CartItem {
                item: input.item,
                quantity: input.quantity,
                quote_id: input.quote_id,
                added_at: now,
            }),
        }
        cart.updated_at = now;
        self.store.put_cart(&txn, &cart)?;
        self.store.commit(txn)?;
        Ok(cart)
    }

    pub async fn update_quantity(
        &self,
        principal: &Principal,
        item: &ItemRef,
        quantity: u32,
    ) -> EngineResult<Cart> {
        principal.require_role(Role::Buyer)?;
        if quantity == 0 {
            return Err(EngineError::validation("quantity must be positive"));
        }

        let now = now_millis();
        let txn = self.store.begin_write()?;
        let mut cart = self.store.cart_txn(&txn, &principal.id, now)?;
        let line = cart
            .items
            .iter_mut()
            .find(|line| &line.item == item)
            .ok_or_else(|| EngineError::not_found("cart item", item.listing_id()))?;
        line.quantity = quantity;
        cart.updated_at = now;
        self.store.put_cart(&txn, &cart)?;
        self.store.commit(txn)?;
        Ok(cart)
    }

    pub async fn remove_item(&self, principal: &Principal, item: &ItemRef) -> EngineResult<Cart> {
        principal.require_role(Role::Buyer)?;

        let now = now_millis();
        let txn = self.store.begin_write()?;
        let mut cart = self.store.cart_txn(&txn, &principal.id, now)?;
        let before = cart.items.len();
        cart.items.retain(|line| &line.item != item);
        if cart.items.len() == before {
            return Err(EngineError::not_found("cart item", item.listing_id()));
        }
        cart.updated_at = now;
        self.store.put_cart(&txn, &cart)?;
        self.store.commit(txn)?;
        Ok(cart)
    }

    pub async fn clear(&self, principal: &Principal) -> EngineResult<()> {
        principal.require_role(Role::Buyer)?;
        let now = now_millis();
        let txn = self.store.begin_write()?;
        self.store.put_cart(&txn, &Cart::empty(&principal.id, now))?;
        self.store.commit(txn)?;
        Ok(())
    }

    pub fn cart(&self, principal: &Principal) -> EngineResult<Cart> {
        principal.require_role(Role::Buyer)?;
        self.store.cart(&principal.id, now_millis())
    }
}
