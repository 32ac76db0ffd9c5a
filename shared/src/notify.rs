//! Notification payloads emitted after buyer/seller-visible transitions.
//!
//! Delivery is fire-and-forget: a sink failure is logged and never rolls
//! back the business transition that produced the event.

use serde::{Deserialize, Serialize};

use crate::types::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    QuoteRequested,
    QuoteSent,
    QuoteAccepted,
    QuoteRejected,
    DesignSubmitted,
    DesignApproved,
    DesignRejected,
    DesignChangesRequested,
    DesignResubmitted,
    OrderPlaced,
    OrderPaid,
    OrderShipped,
    OrderDelivered,
    OrderCancelled,
    BookingPaid,
    BookingCompleted,
    ReturnOpened,
    ReturnSellerResponded,
    ReturnResolved,
    ReturnRefunded,
    PayoutReleased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: Id,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl NotificationEvent {
    pub fn new(
        user_id: impl Into<Id>,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            title: title.into(),
            message: message.into(),
            metadata,
        }
    }
}
