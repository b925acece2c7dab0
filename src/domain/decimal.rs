//! Lossless decimal money type backed by rust_decimal.
//!
//! Provides canonical parsing from strings, currency rounding, and formatting
//! without exponent notation.

use rust_decimal::RoundingStrategy;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;

/// Number of fractional digits carried by settled currency amounts.
pub const CURRENCY_DP: u32 = 2;

/// Lossless decimal numeric type for financial calculations.
///
/// Backed by rust_decimal to avoid floating-point drift.
/// Serializes to a JSON string so amounts never pass through an f64.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    /// Create a Decimal from a RustDecimal.
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    ///
    /// # Errors
    /// Returns an error if the string is not a valid decimal number.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s.trim()).map(Decimal)
    }

    /// Build an integral amount.
    pub fn from_i64(value: i64) -> Self {
        Decimal(RustDecimal::from(value))
    }

    /// Format the Decimal as a canonical string (no exponent notation).
    pub fn to_canonical_string(&self) -> String {
        let normalized = self.0.normalize();
        format!("{}", normalized)
    }

    /// Round to currency precision using round-half-up (away from zero).
    pub fn round_currency(&self) -> Self {
        self.round_dp_half_up(CURRENCY_DP)
    }

    /// Round to `dp` fractional digits, ties away from zero.
    pub fn round_dp_half_up(&self, dp: u32) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Round toward zero to currency precision.
    pub fn truncate_currency(&self) -> Self {
        Decimal(
            self.0
                .round_dp_with_strategy(CURRENCY_DP, RoundingStrategy::ToZero),
        )
    }

    /// Division that reports a zero divisor instead of panicking.
    pub fn checked_div(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }

    /// Multiplication that reports overflow instead of panicking.
    pub fn checked_mul(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    /// Addition that reports overflow instead of panicking.
    pub fn checked_add(&self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    /// Get the underlying RustDecimal.
    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    /// The additive identity (0).
    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    /// Returns true if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the value is > 0.
    pub fn is_positive(&self) -> bool {
        !self.is_zero() && self.0.is_sign_positive()
    }

    /// Returns true if the value is < 0.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.0.is_sign_negative()
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        Decimal(self.0.abs())
    }

    /// Returns the value 100.
    pub fn hundred() -> Self {
        Decimal(RustDecimal::ONE_HUNDRED)
    }

    /// Returns the value 1.
    pub fn one() -> Self {
        Decimal(RustDecimal::ONE)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<Decimal> for RustDecimal {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl Sum for Decimal {
    fn sum<I: Iterator<Item = Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + d)
    }
}

impl<'a> Sum<&'a Decimal> for Decimal {
    fn sum<I: Iterator<Item = &'a Decimal>>(iter: I) -> Self {
        iter.fold(Decimal::zero(), |acc, d| acc + *d)
    }
}

// Arithmetic operations
impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for Decimal {
    fn add_assign(&mut self, rhs: Decimal) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Mul for Decimal {
    type Output = Decimal;

    fn mul(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 * rhs.0)
    }
}

impl std::ops::Div for Decimal {
    type Output = Decimal;

    fn div(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 / rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    #[test]
    fn test_decimal_canonical_no_exponent() {
        let decimal = d("123.4500");
        let formatted = decimal.to_canonical_string();
        assert!(!formatted.contains('e'));
        assert_eq!(formatted, "123.45");
    }

    #[test]
    fn test_round_currency_half_up() {
        assert_eq!(d("0.125").round_currency(), d("0.13"));
        assert_eq!(d("0.124").round_currency(), d("0.12"));
        assert_eq!(d("-0.125").round_currency(), d("-0.13"));
        assert_eq!(d("333.333333").round_currency(), d("333.33"));
    }

    #[test]
    fn test_truncate_currency() {
        assert_eq!(d("0.006666").truncate_currency(), d("0.00"));
        assert_eq!(d("33.339").truncate_currency(), d("33.33"));
    }

    #[test]
    fn test_checked_ops_report_overflow() {
        let max = d("79228162514264337593543950335");
        assert_eq!(max.checked_mul(d("2")), None);
        assert_eq!(max.checked_add(d("1")), None);
        assert_eq!(d("2.5").checked_mul(d("4")), Some(d("10")));
        assert_eq!(d("2.5").checked_add(d("4")), Some(d("6.5")));
    }

    #[test]
    fn test_decimal_arithmetic() {
        let a = d("10.5");
        let b = d("2.5");
        assert_eq!((a + b).to_canonical_string(), "13");
        assert_eq!((a - b).to_canonical_string(), "8");
        assert_eq!((a * b).to_canonical_string(), "26.25");
        assert_eq!((a / b).to_canonical_string(), "4.2");
    }

    #[test]
    fn test_checked_div_by_zero() {
        assert!(d("10").checked_div(Decimal::zero()).is_none());
        assert_eq!(d("10").checked_div(d("4")), Some(d("2.5")));
    }

    #[test]
    fn test_sum_iterator() {
        let total: Decimal = vec![d("0.1"), d("0.2"), d("0.3")].into_iter().sum();
        assert_eq!(total, d("0.6"));
    }

    #[test]
    fn test_decimal_json_serialization_is_string() {
        let decimal = d("123.456");
        let json = serde_json::to_value(decimal).unwrap();
        assert!(json.is_string());
        assert_eq!(json, serde_json::json!("123.456"));

        let back: Decimal = serde_json::from_value(json).unwrap();
        assert_eq!(back, decimal);
    }

    #[test]
    fn test_decimal_sign_helpers() {
        assert!(d("1").is_positive());
        assert!(d("-1").is_negative());
        assert!(!Decimal::zero().is_positive());
        assert!(!Decimal::zero().is_negative());
    }
}
