//! Payment-gateway boundary types.
//!
//! The engine never talks to the gateway directly. A gateway checkout
//! answers with a [`RedirectDescriptor`]; the gateway later calls back
//! with a [`WebhookEvent`], which the escrow ledger maps to a
//! pending-to-escrow transition, idempotently.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shared::new_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectDescriptor {
    pub url: String,
    pub reference: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Paid,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub reference: String,
    pub status: WebhookStatus,
    pub amount: Decimal,
}

/// Fresh opaque payment reference.
pub fn new_payment_reference() -> String {
    new_id("pay")
}

pub fn redirect_for(base_url: &str, reference: &str, amount: Decimal) -> RedirectDescriptor {
    RedirectDescriptor {
        url: format!("{}/pay/{}", base_url.trim_end_matches('/'), reference),
        reference: reference.to_string(),
        amount,
    }
}
