//! Unified error taxonomy for the transaction engine.
//!
//! Business-rule violations are typed and returned to the caller without
//! retry. Store failures surface as [`EngineError::Storage`] with a
//! generic message; full context is logged at the point of failure.
//!
//! Every variant maps to a stable machine-readable [`ErrorCode`] so
//! callers (route handlers, UI) can branch without string matching.

use thiserror::Error;

use crate::models::purchase::RequirementReason;
use crate::types::Id;

/// Stable machine-readable code for each error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    Forbidden,
    InvalidTransition,
    Validation,
    RequirementNotMet,
    IncompleteCheckoutSession,
    CrossSellerCopy,
    Expired,
    Storage,
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Id },

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Current status does not permit the requested transition. Always
    /// carries the current status and the states the action is valid in.
    #[error("{entity} {id}: cannot {action} while status is {current}, requires one of {allowed:?}")]
    InvalidTransition {
        entity: &'static str,
        id: Id,
        action: &'static str,
        current: String,
        allowed: Vec<String>,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    /// Purchase gating failed; reasons are machine-readable for the UI.
    #[error("purchase requirements not met: {reasons:?}")]
    RequirementNotMet { reasons: Vec<RequirementReason> },

    /// A checkout session has sibling orders that are not ready to ship.
    #[error("checkout session {session_id} has orders not ready to ship: {pending:?}")]
    IncompleteCheckoutSession { session_id: Id, pending: Vec<Id> },

    #[error("design approval can only be copied within the same seller's catalog")]
    CrossSellerCopy,

    #[error("expired: {0}")]
    Expired(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::Validation(_) => ErrorCode::Validation,
            Self::RequirementNotMet { .. } => ErrorCode::RequirementNotMet,
            Self::IncompleteCheckoutSession { .. } => ErrorCode::IncompleteCheckoutSession,
            Self::CrossSellerCopy => ErrorCode::CrossSellerCopy,
            Self::Expired(_) => ErrorCode::Expired,
            Self::Storage(_) => ErrorCode::Storage,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<Id>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn expired(message: impl Into<String>) -> Self {
        Self::Expired(message.into())
    }

    /// True for business-rule violations that the caller should surface
    /// verbatim; false for internal failures that surface generically.
    pub fn is_business_error(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
