//! Boost purchases: paid listing promotion. Creating the purchase and
//! its platform transaction is one atomic scope; activation happens
//! when the payment reaches escrow. The platform retains the full
//! amount (no commission, no release path).

use shared::models::{
    BoostPurchase, BoostStatus, PaymentMethod, PurchaseBoostInput, Transaction,
    TransactionParent, TransactionStatus,
};
use shared::util::now_millis;
use shared::{new_id, EngineResult, Principal, Role};
use rust_decimal::Decimal;
use validator::Validate;

use crate::config::EngineConfig;
use crate::db::{EntityStore, GatewayRefTarget};
use crate::gateway::{new_payment_reference, redirect_for, RedirectDescriptor};
use crate::money;

pub struct BoostManager {
    store: EntityStore,
    config: EngineConfig,
}

impl BoostManager {
    pub fn new(store: EntityStore, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Seller buys promotion for a listing. Creates the boost purchase
    /// and its zero-commission platform transaction atomically; gateway
    /// payments get a redirect descriptor.
    pub async fn purchase_boost(
        &self,
        principal: &Principal,
        input: PurchaseBoostInput,
    ) -> EngineResult<(BoostPurchase, Option<RedirectDescriptor>)> {
        principal.require_role(Role::Seller)?;
        input.validate()?;
        money::validate_price(input.amount, "boost amount")?;

        let now = now_millis();
        let txn = self.store.begin_write()?;
        let product = self.store.product_txn(&txn, &input.product_id)?;
        principal.require_self(&product.seller_id, "product")?;

        let boost = BoostPurchase {
            id: new_id("bst"),
            seller_id: principal.id.clone(),
            product_id: product.id.clone(),
            amount: input.amount,
            duration_days: input.duration_days,
            starts_at: None,
            ends_at: None,
            status: BoostStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        };
        self.store.put_boost(&txn, &boost)?;

        let gateway_reference = match input.payment_method {
            PaymentMethod::Gateway => Some(new_payment_reference()),
            PaymentMethod::BankTransfer => None,
        };
        // The platform keeps the whole amount: commission is zero and
        // the release path rejects boost parents outright.
        let transaction = Transaction {
            id: new_id("txn"),
            parent: TransactionParent::Boost(boost.id.clone()),
            buyer_id: principal.id.clone(),
            seller_id: principal.id.clone(),
            amount: input.amount,
            commission_rate: Decimal::ZERO,
            commission_amount: Decimal::ZERO,
            seller_payout: input.amount,
            status: TransactionStatus::Pending,
            gateway_reference: gateway_reference.clone(),
            bank_account_id: None,
            payment_slip_url: None,
            refunded_amount: None,
            escrowed_at: None,
            released_at: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_transaction(&txn, &transaction)?;
        if let Some(reference) = &gateway_reference {
            self.store.put_gateway_ref(
                &txn,
                reference,
                &GatewayRefTarget::Transaction(transaction.id.clone()),
            )?;
        }
        self.store.commit(txn)?;

        let redirect = gateway_reference
            .map(|reference| redirect_for(&self.config.gateway_base_url, &reference, input.amount));
        Ok((boost, redirect))
    }

    /// Read-side view: is the listing currently promoted?
    pub fn is_promoted(&self, boost_id: &str) -> EngineResult<bool> {
        Ok(self.store.boost(boost_id)?.is_live(now_millis()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::escrow::EscrowManager;
    use crate::gateway::{WebhookEvent, WebhookStatus};
    use crate::notify::{MemorySink, NotificationSink};
    use crate::testutil::{seed_product, store_with_users};
    use shared::EngineError;

    fn boost_input(product_id: &str, method: PaymentMethod) -> PurchaseBoostInput {
        PurchaseBoostInput {
            product_id: product_id.into(),
            amount: "12.00".parse().unwrap(),
            duration_days: 14,
            payment_method: method,
        }
    }

    #[tokio::test]
    async fn test_boost_purchase_creates_platform_transaction() {
        let store = store_with_users();
        let sink = MemorySink::new();
        let boosts = BoostManager::new(store.clone(), EngineConfig::default());
        let (product_id, _) = seed_product(&store, "usr_seller", false, false);

        let (boost, redirect) = boosts
            .purchase_boost(
                &Principal::seller("usr_seller"),
                boost_input(&product_id, PaymentMethod::Gateway),
            )
            .await
            .unwrap();
        assert_eq!(boost.status, BoostStatus::PendingPayment);
        let redirect = redirect.unwrap();
        assert_eq!(redirect.amount, boost.amount);

        let transaction = &store.transactions_for_parent(&boost.id).unwrap()[0];
        assert_eq!(transaction.commission_amount, Decimal::ZERO);
        assert_eq!(transaction.amount, transaction.seller_payout + transaction.commission_amount);

        // Webhook activates the promotion window
        let escrow = EscrowManager::new(store.clone(), sink.clone() as Arc<dyn NotificationSink>);
        escrow
            .handle_gateway_webhook(WebhookEvent {
                reference: redirect.reference,
                status: WebhookStatus::Paid,
                amount: boost.amount,
            })
            .await
            .unwrap();
        let activated = store.boost(&boost.id).unwrap();
        assert_eq!(activated.status, BoostStatus::Active);
        assert!(activated.starts_at.is_some());
        assert!(boosts.is_promoted(&boost.id).unwrap());

        // Boost money is never released to the seller
        let transaction_id = store.transactions_for_parent(&boost.id).unwrap()[0].id.clone();
        let err = escrow
            .release(&Principal::admin("usr_admin"), &transaction_id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cannot_boost_someone_elses_product() {
        let store = store_with_users();
        let boosts = BoostManager::new(store.clone(), EngineConfig::default());
        let (product_id, _) = seed_product(&store, "usr_seller", false, false);

        let err = boosts
            .purchase_boost(
                &Principal::seller("usr_other"),
                boost_input(&product_id, PaymentMethod::BankTransfer),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }
}
