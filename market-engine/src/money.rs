//! Money arithmetic for the escrow ledger and checkout.
//!
//! All monetary values are `rust_decimal::Decimal`, rounded to 2 decimal
//! places half-up. Distribution never loses a remainder: the parts of a
//! split always sum exactly to the whole.

use rust_decimal::prelude::*;
use shared::{EngineError, EngineResult};

/// Monetary precision (2 decimal places).
pub const MONEY_DP: u32 = 2;

/// Maximum allowed single amount.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Round to monetary precision, half-up.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Validate a non-negative monetary amount within bounds.
pub fn validate_amount(value: Decimal, field: &str) -> EngineResult<()> {
    if value.is_sign_negative() {
        return Err(EngineError::validation(format!(
            "{} must be non-negative, got {}",
            field, value
        )));
    }
    if value > MAX_AMOUNT {
        return Err(EngineError::validation(format!(
            "{} exceeds maximum allowed ({}), got {}",
            field, MAX_AMOUNT, value
        )));
    }
    Ok(())
}

/// Validate a strictly positive monetary amount within bounds.
pub fn validate_price(value: Decimal, field: &str) -> EngineResult<()> {
    validate_amount(value, field)?;
    if value.is_zero() {
        return Err(EngineError::validation(format!(
            "{} must be positive",
            field
        )));
    }
    Ok(())
}

/// Line total for a unit price and quantity.
pub fn line_total(unit_price: Decimal, quantity: u32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

/// Split an amount into platform commission and seller payout.
/// `payout = amount - commission` always holds exactly.
pub fn commission_split(amount: Decimal, rate: Decimal) -> (Decimal, Decimal) {
    let commission = round_money(amount * rate);
    (commission, amount - commission)
}

/// Shipping cost for a checkout: flat base plus a per-kilogram component.
pub fn shipping_cost(base: Decimal, per_kg: Decimal, total_weight_grams: u64) -> Decimal {
    let kg = Decimal::from(total_weight_grams) / Decimal::from(1000);
    round_money(base + per_kg * kg)
}

/// Distribute a checkout's shipping cost across its order lines by
/// weight share.
///
/// A sole line carries 100% of the cost. With several lines each gets a
/// proportional rounded share and the heaviest line absorbs the
/// remainder, so the shares always sum exactly to `total`. Zero total
/// weight degrades to an equal split.
pub fn distribute_shipping(total: Decimal, weights: &[u32]) -> Vec<Decimal> {
    match weights.len() {
        0 => Vec::new(),
        1 => vec![round_money(total)],
        n => {
            let total = round_money(total);
            let sum: u64 = weights.iter().map(|w| *w as u64).sum();
            let mut shares: Vec<Decimal> = if sum == 0 {
                let equal = round_money(total / Decimal::from(n as u64));
                vec![equal; n]
            } else {
                weights
                    .iter()
                    .map(|w| round_money(total * Decimal::from(*w) / Decimal::from(sum)))
                    .collect()
            };
            // Heaviest line absorbs the rounding remainder.
            let heaviest = weights
                .iter()
                .enumerate()
                .max_by_key(|(_, w)| **w)
                .map(|(i, _)| i)
                .unwrap_or(0);
            let assigned: Decimal = shares
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != heaviest)
                .map(|(_, s)| *s)
                .sum();
            shares[heaviest] = total - assigned;
            shares
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec("1.005")), dec("1.01"));
        assert_eq!(round_money(dec("1.004")), dec("1.00"));
    }

    #[test]
    fn test_line_total_keeps_scale() {
        assert_eq!(line_total(dec("50.00"), 2), dec("100.00"));
        assert_eq!(line_total(dec("50.00"), 2).to_string(), "100.00");
    }

    #[test]
    fn test_commission_split_is_exact() {
        let (commission, payout) = commission_split(dec("100.00"), dec("0.10"));
        assert_eq!(commission, dec("10.00"));
        assert_eq!(payout, dec("90.00"));
        assert_eq!(commission + payout, dec("100.00"));

        // Odd amounts still partition exactly
        let (commission, payout) = commission_split(dec("33.33"), dec("0.10"));
        assert_eq!(commission + payout, dec("33.33"));
    }

    #[test]
    fn test_sole_line_gets_full_shipping() {
        assert_eq!(distribute_shipping(dec("7.77"), &[250]), vec![dec("7.77")]);
    }

    #[test]
    fn test_multi_line_shares_sum_to_total() {
        let shares = distribute_shipping(dec("10.00"), &[100, 200, 33]);
        assert_eq!(shares.len(), 3);
        let sum: Decimal = shares.iter().copied().sum();
        assert_eq!(sum, dec("10.00"));
        // Heavier lines pay more
        assert!(shares[1] > shares[0]);
        assert!(shares[0] > shares[2]);
    }

    #[test]
    fn test_zero_weight_split_is_equal_and_exact() {
        let shares = distribute_shipping(dec("10.00"), &[0, 0, 0]);
        let sum: Decimal = shares.iter().copied().sum();
        assert_eq!(sum, dec("10.00"));
    }

    #[test]
    fn test_validate_bounds() {
        assert!(validate_amount(dec("0"), "amount").is_ok());
        assert!(validate_amount(dec("-0.01"), "amount").is_err());
        assert!(validate_amount(dec("1000001"), "amount").is_err());
        assert!(validate_price(dec("0"), "price").is_err());
        assert!(validate_price(dec("0.01"), "price").is_ok());
    }

    #[test]
    fn test_shipping_cost_by_weight() {
        // 4.50 base + 1.20/kg * 2.5kg = 7.50
        assert_eq!(
            shipping_cost(dec("4.50"), dec("1.20"), 2_500),
            dec("7.50")
        );
    }
}
