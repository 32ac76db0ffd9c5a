//! Entity models and input payloads.

pub mod booking;
pub mod boost;
pub mod catalog;
pub mod checkout;
pub mod design;
pub mod order;
pub mod purchase;
pub mod quote;
pub mod return_request;
pub mod shipment;
pub mod transaction;
pub mod user;

pub use booking::{Booking, BookingStatus};
pub use boost::{BoostPurchase, BoostStatus, PurchaseBoostInput};
pub use catalog::{ItemRef, Package, Product, Service, Variant};
pub use checkout::{
    Cart, CartAddInput, CartItem, CheckoutInput, CheckoutSession, PaymentMethod,
};
pub use design::{
    DesignApproval, DesignContext, DesignFile, DesignFileInput, DesignStatus, SubmitDesignInput,
};
pub use order::{Order, OrderStatus, ShippingAddress};
pub use purchase::{PurchaseDecision, RequirementReason};
pub use quote::{Quote, QuoteStatus, SendQuoteInput};
pub use return_request::{
    ReturnParent, ReturnRequest, ReturnStatus, SellerReviewStatus, SubmitReturnInput,
};
pub use shipment::{CarrierStatus, ConsolidateInput, Shipment, ShipmentKind};
pub use transaction::{Transaction, TransactionParent, TransactionStatus};
pub use user::User;
