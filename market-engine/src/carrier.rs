//! Abstract shipping-carrier client.
//!
//! The concrete HTTP client lives outside the engine. Carrier failures
//! degrade: orders transition to shipped regardless, the shipment's
//! carrier booking stays pending and can be retried by admin.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use shared::models::ShippingAddress;
use shared::Id;

#[derive(Debug, Clone)]
pub struct ShipmentRequest {
    /// Engine-side shipment id, echoed back by the carrier.
    pub reference: Id,
    pub destination: ShippingAddress,
    pub total_weight_grams: u64,
    pub parcel_count: u32,
}

#[derive(Debug, Clone)]
pub struct ShipmentReceipt {
    pub awb_id: String,
    pub label_url: String,
    pub cost: Decimal,
}

#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("carrier rejected request: {0}")]
    Rejected(String),
    #[error("carrier unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CarrierClient: Send + Sync {
    async fn create_shipment(&self, request: &ShipmentRequest)
        -> Result<ShipmentReceipt, CarrierError>;
}

/// Scriptable in-process carrier for tests and local development.
pub struct StubCarrier {
    fail: Mutex<bool>,
    requests: Mutex<Vec<ShipmentRequest>>,
}

impl Default for StubCarrier {
    fn default() -> Self {
        Self {
            fail: Mutex::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl StubCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    pub fn requests(&self) -> Vec<ShipmentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CarrierClient for StubCarrier {
    async fn create_shipment(
        &self,
        request: &ShipmentRequest,
    ) -> Result<ShipmentReceipt, CarrierError> {
        self.requests.lock().unwrap().push(request.clone());
        if *self.fail.lock().unwrap() {
            return Err(CarrierError::Unavailable("stub carrier offline".into()));
        }
        Ok(ShipmentReceipt {
            awb_id: format!("AWB-{}", request.reference),
            label_url: format!("https://labels.example.com/{}.pdf", request.reference),
            cost: Decimal::new(350, 2),
        })
    }
}
