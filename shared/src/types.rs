//! Core identifier and principal types.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// String entity identifier (prefixed UUID).
pub type Id = String;

/// Generate a new prefixed identifier, e.g. `ord_3f9a…`.
pub fn new_id(prefix: &str) -> Id {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Role of an authenticated principal.
///
/// Role gating happens at the operation boundary; state machines still
/// re-check ownership as a second line of defense.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Buyer => write!(f, "buyer"),
            Role::Seller => write!(f, "seller"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

/// Opaque authenticated principal, provided by the (external) auth layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: Id,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<Id>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn buyer(id: impl Into<Id>) -> Self {
        Self::new(id, Role::Buyer)
    }

    pub fn seller(id: impl Into<Id>) -> Self {
        Self::new(id, Role::Seller)
    }

    pub fn admin(id: impl Into<Id>) -> Self {
        Self::new(id, Role::Admin)
    }

    /// Require an exact role. Admin does not implicitly satisfy
    /// buyer/seller checks; admin-only operations use [`Self::require_admin`].
    pub fn require_role(&self, role: Role) -> EngineResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "operation requires {} role, principal {} has {}",
                role, self.id, self.role
            )))
        }
    }

    pub fn require_admin(&self) -> EngineResult<()> {
        self.require_role(Role::Admin)
    }

    /// Ownership re-check: the principal must be the named user.
    pub fn require_self(&self, owner_id: &str, what: &str) -> EngineResult<()> {
        if self.id == owner_id {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "principal {} does not own {}",
                self.id, what
            )))
        }
    }
}
