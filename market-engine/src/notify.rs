//! Notification sink interface.
//!
//! The engine emits one event after each buyer/seller-visible state
//! transition, always after the owning write transaction committed.
//! Delivery failure is logged and swallowed; it never rolls back or
//! fails the transition that produced it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use shared::notify::NotificationEvent;

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotifyError>;
}

/// Fire-and-forget emit. Failures are logged, never propagated.
pub(crate) async fn emit(sink: &Arc<dyn NotificationSink>, event: NotificationEvent) {
    let kind = event.kind;
    let user_id = event.user_id.clone();
    if let Err(err) = sink.deliver(event).await {
        tracing::warn!(
            error = %err,
            kind = ?kind,
            user_id = %user_id,
            "notification delivery failed, transition unaffected"
        );
    }
}

/// Sink that logs events (default for embedders without a delivery
/// channel wired up).
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        tracing::info!(
            kind = ?event.kind,
            user_id = %event.user_id,
            title = %event.title,
            "notification"
        );
        Ok(())
    }
}

/// Recording sink for tests: counts and exposes delivered events.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<NotificationEvent>>,
    fail: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent delivery fail (to exercise degradation).
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap() = failing;
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, kind: shared::notify::NotificationKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(&self, event: NotificationEvent) -> Result<(), NotifyError> {
        if *self.fail.lock().unwrap() {
            return Err(NotifyError("sink offline".into()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
