//! Catalog entities: products with variants, services with packages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Id;

/// Listed product. Gating flags decide which purchase requirements apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Id,
    pub seller_id: Id,
    pub title: String,
    /// Purchase requires an accepted quote.
    pub requires_quote: bool,
    /// Purchase requires an approved design.
    pub requires_design: bool,
    pub created_at: i64,
}

/// Concrete purchasable configuration of a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: Id,
    pub product_id: Id,
    pub name: String,
    pub price: Decimal,
    pub weight_grams: u32,
    pub created_at: i64,
}

/// Listed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Id,
    pub seller_id: Id,
    pub title: String,
    pub requires_quote: bool,
    pub requires_design: bool,
    pub created_at: i64,
}

/// Bookable tier of a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub id: Id,
    pub service_id: Id,
    pub name: String,
    pub price: Decimal,
    pub created_at: i64,
}

/// Reference to one side of the catalog.
///
/// Encodes the "exactly one of product/service" invariant structurally.
/// A `None` variant/package is the "custom" scope: a negotiation about
/// the item that is not pinned to a listed configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemRef {
    Product {
        product_id: Id,
        variant_id: Option<Id>,
    },
    Service {
        service_id: Id,
        package_id: Option<Id>,
    },
}

impl ItemRef {
    pub fn product(product_id: impl Into<Id>, variant_id: Option<Id>) -> Self {
        Self::Product {
            product_id: product_id.into(),
            variant_id,
        }
    }

    pub fn service(service_id: impl Into<Id>, package_id: Option<Id>) -> Self {
        Self::Service {
            service_id: service_id.into(),
            package_id,
        }
    }

    pub fn is_product(&self) -> bool {
        matches!(self, Self::Product { .. })
    }

    /// Listing id (product or service), ignoring the configuration.
    pub fn listing_id(&self) -> &str {
        match self {
            Self::Product { product_id, .. } => product_id,
            Self::Service { service_id, .. } => service_id,
        }
    }

    /// Configuration id (variant or package), if pinned.
    pub fn config_id(&self) -> Option<&str> {
        match self {
            Self::Product { variant_id, .. } => variant_id.as_deref(),
            Self::Service { package_id, .. } => package_id.as_deref(),
        }
    }

    pub fn is_custom(&self) -> bool {
        self.config_id().is_none()
    }

    /// Same listing and same pinned configuration.
    pub fn same_scope(&self, other: &ItemRef) -> bool {
        self == other
    }

    /// True when this reference covers `concrete`: either the exact same
    /// scope, or a custom scope on the same listing.
    pub fn covers(&self, concrete: &ItemRef) -> bool {
        if self.listing_id() != concrete.listing_id() {
            return false;
        }
        match self.config_id() {
            None => true,
            Some(cfg) => concrete.config_id() == Some(cfg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_ref_scope_matching() {
        let exact = ItemRef::product("prd_1", Some("var_1".into()));
        let custom = ItemRef::product("prd_1", None);
        let other = ItemRef::product("prd_2", Some("var_1".into()));

        assert!(exact.covers(&exact));
        assert!(custom.covers(&exact));
        assert!(!exact.covers(&custom));
        assert!(!other.covers(&exact));
        assert!(custom.is_custom());
        assert!(!exact.is_custom());
    }

    #[test]
    fn test_item_ref_accessors() {
        let svc = ItemRef::service("svc_1", Some("pkg_1".into()));
        assert!(!svc.is_product());
        assert_eq!(svc.listing_id(), "svc_1");
        assert_eq!(svc.config_id(), Some("pkg_1"));
    }
}
