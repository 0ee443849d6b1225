//! Fixed-point arithmetic for vault accounting.
//!
//! All ratios (leverage, thresholds, deviations) are WAD-scaled: `1e18 == 1x`.
//! Token amounts stay in their native integer units (`U256`). Every division
//! in the engine goes through [`mul_div`] with an explicit [`Rounding`]
//! direction; monetary subtractions that can underflow from rounding or
//! oracle drift go through [`saturating_sub`], which floors at zero and
//! reports the underflow instead of panicking or wrapping.

use alloy_primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

/// 1e18, the fixed-point unit for ratios.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// WAD as a `U256`.
pub fn wad() -> U256 {
    U256::from(WAD)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("multiplication overflow: {0} * {1}")]
    Overflow(U256, U256),
    #[error("value does not fit the target representation: {0}")]
    Unrepresentable(String),
}

/// Rounding direction for a division. Floor favors the share holder pool,
/// ceiling favors the vault (fees, collateral requirements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
}

/// `a * b / denominator` with an explicit rounding direction.
pub fn mul_div(a: U256, b: U256, denominator: U256, rounding: Rounding) -> Result<U256, MathError> {
    if denominator.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    let product = a.checked_mul(b).ok_or(MathError::Overflow(a, b))?;
    let quotient = product / denominator;
    match rounding {
        Rounding::Floor => Ok(quotient),
        Rounding::Ceil => {
            if product % denominator != U256::ZERO {
                Ok(quotient + U256::from(1))
            } else {
                Ok(quotient)
            }
        }
    }
}

/// `a * b / WAD`.
pub fn mul_wad(a: U256, b: U256, rounding: Rounding) -> Result<U256, MathError> {
    mul_div(a, b, wad(), rounding)
}

/// `a * WAD / b`.
pub fn div_wad(a: U256, b: U256, rounding: Rounding) -> Result<U256, MathError> {
    mul_div(a, wad(), b, rounding)
}

/// `a - b`, floored at zero. Returns the result and whether an underflow was
/// absorbed, so callers can log or branch on the drift without panicking.
pub fn saturating_sub(a: U256, b: U256) -> (U256, bool) {
    if b > a {
        (U256::ZERO, true)
    } else {
        (a - b, false)
    }
}

/// Relative deviation `|a - b| * WAD / reference`, zero if the reference is
/// zero. Used for leverage-convergence and response-deviation checks.
pub fn relative_deviation(a: U256, b: U256, reference: U256) -> U256 {
    if reference.is_zero() {
        return U256::ZERO;
    }
    let diff = if a > b { a - b } else { b - a };
    diff.checked_mul(wad())
        .map(|p| p / reference)
        .unwrap_or(U256::MAX)
}

/// Convert a human-readable decimal ratio (e.g. `5.0` for 5x leverage) into
/// a WAD-scaled `U256`. Rejects negatives and values too large for u128 wei.
pub fn decimal_to_wad(value: Decimal) -> Result<U256, MathError> {
    if value.is_sign_negative() {
        return Err(MathError::Unrepresentable(format!(
            "negative ratio: {value}"
        )));
    }
    let scaled = value
        .checked_mul(Decimal::from(WAD as u64))
        .ok_or_else(|| MathError::Unrepresentable(format!("ratio too large: {value}")))?;
    let as_u128 = scaled
        .trunc()
        .to_u128()
        .ok_or_else(|| MathError::Unrepresentable(format!("ratio too large: {value}")))?;
    Ok(U256::from(as_u128))
}

/// Render a WAD-scaled ratio as a decimal string for logs and snapshots.
pub fn wad_to_display(value: U256) -> String {
    let whole = value / wad();
    let frac = value % wad();
    if frac.is_zero() {
        format!("{whole}")
    } else {
        let digits = frac.to_string();
        let frac_str = format!("{digits:0>18}");
        format!("{whole}.{}", frac_str.trim_end_matches('0'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn u(v: u128) -> U256 {
        U256::from(v)
    }

    #[test]
    fn mul_div_floor_truncates() {
        let result = mul_div(u(7), u(3), u(2), Rounding::Floor).unwrap();
        assert_eq!(result, u(10));
    }

    #[test]
    fn mul_div_ceil_rounds_up_on_remainder() {
        let result = mul_div(u(7), u(3), u(2), Rounding::Ceil).unwrap();
        assert_eq!(result, u(11));
    }

    #[test]
    fn mul_div_ceil_exact_division_unchanged() {
        let result = mul_div(u(8), u(3), u(2), Rounding::Ceil).unwrap();
        assert_eq!(result, u(12));
    }

    #[test]
    fn mul_div_rejects_zero_denominator() {
        assert_eq!(
            mul_div(u(1), u(1), U256::ZERO, Rounding::Floor),
            Err(MathError::DivisionByZero)
        );
    }

    #[test]
    fn saturating_sub_floors_at_zero() {
        let (result, underflowed) = saturating_sub(u(5), u(7));
        assert_eq!(result, U256::ZERO);
        assert!(underflowed);

        let (result, underflowed) = saturating_sub(u(7), u(5));
        assert_eq!(result, u(2));
        assert!(!underflowed);
    }

    #[test]
    fn decimal_to_wad_converts_leverage_ratios() {
        assert_eq!(decimal_to_wad(dec!(5.0)).unwrap(), u(5 * WAD));
        assert_eq!(decimal_to_wad(dec!(1.5)).unwrap(), u(WAD + WAD / 2));
        assert!(decimal_to_wad(dec!(-1)).is_err());
    }

    #[test]
    fn relative_deviation_is_symmetric() {
        let reference = u(10 * WAD);
        let dev = relative_deviation(u(12 * WAD), u(10 * WAD), reference);
        assert_eq!(dev, u(WAD / 5)); // 0.2
        assert_eq!(dev, relative_deviation(u(10 * WAD), u(12 * WAD), reference));
    }

    #[test]
    fn wad_display_trims_trailing_zeros() {
        assert_eq!(wad_to_display(u(5 * WAD)), "5");
        assert_eq!(wad_to_display(u(WAD + WAD / 2)), "1.5");
    }
}
