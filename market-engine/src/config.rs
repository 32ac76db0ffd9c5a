//! Engine configuration.
//!
//! All values can be overridden through environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `MARKET_DATA_DIR` | `/var/lib/market/engine` | redb database directory |
//! | `MARKET_COMMISSION_RATE` | `0.10` | platform commission on merchandise |
//! | `MARKET_QUOTE_VALIDITY_DAYS` | `7` | default quote expiry window |
//! | `MARKET_MAX_RETURN_ATTEMPTS` | `3` | per-order return attempt cap |
//! | `MARKET_SHIPPING_BASE` | `4.50` | flat component of a checkout's shipping cost |
//! | `MARKET_SHIPPING_PER_KG` | `1.20` | weight component per kilogram |
//! | `MARKET_GATEWAY_BASE_URL` | `https://pay.example.com` | gateway redirect base |

use std::str::FromStr;

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: String,
    pub commission_rate: Decimal,
    pub quote_validity_days: i64,
    pub max_return_attempts: u32,
    pub shipping_base: Decimal,
    pub shipping_per_kg: Decimal,
    pub gateway_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/market/engine".into(),
            commission_rate: Decimal::new(10, 2),
            quote_validity_days: 7,
            max_return_attempts: 3,
            shipping_base: Decimal::new(450, 2),
            shipping_per_kg: Decimal::new(120, 2),
            gateway_base_url: "https://pay.example.com".into(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();
        Self {
            data_dir: std::env::var("MARKET_DATA_DIR").unwrap_or(defaults.data_dir),
            commission_rate: env_decimal("MARKET_COMMISSION_RATE", defaults.commission_rate),
            quote_validity_days: env_parse("MARKET_QUOTE_VALIDITY_DAYS", defaults.quote_validity_days),
            max_return_attempts: env_parse("MARKET_MAX_RETURN_ATTEMPTS", defaults.max_return_attempts),
            shipping_base: env_decimal("MARKET_SHIPPING_BASE", defaults.shipping_base),
            shipping_per_kg: env_decimal("MARKET_SHIPPING_PER_KG", defaults.shipping_per_kg),
            gateway_base_url: std::env::var("MARKET_GATEWAY_BASE_URL")
                .unwrap_or(defaults.gateway_base_url),
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(name: &str, default: Decimal) -> Decimal {
    std::env::var(name)
        .ok()
        .and_then(|v| Decimal::from_str(&v).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.commission_rate, Decimal::new(10, 2));
        assert_eq!(cfg.quote_validity_days, 7);
        assert_eq!(cfg.max_return_attempts, 3);
    }
}
