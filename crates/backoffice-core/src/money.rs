//! # Money Module
//!
//! Provides the `Money` type for every monetary amount in the back office.
//!
//! ## Why Decimal Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE ROUNDING DRIFT PROBLEM                                             │
//! │                                                                         │
//! │  VAT on a single 0.99 line at 13.5% is 0.13365.                        │
//! │  Rounding each line to cents before summing:                           │
//! │    10,000 lines × 0.13 = 1,300.00                                      │
//! │  Summing first and rounding once:                                      │
//! │    10,000 lines × 0.13365 = 1,336.50                                   │
//! │                                                                         │
//! │  OUR SOLUTION: exact decimals, rounded only for presentation           │
//! │    Money(Decimal) keeps every fraction digit through the sums.         │
//! │    round2() applies half-up rounding at the edge.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use backoffice_core::money::Money;
//! use rust_decimal::Decimal;
//!
//! let net = Money::from_cents(99);
//! let vat = net.calculate_vat(Decimal::new(135, 3));
//! assert_eq!(vat.amount(), Decimal::new(13365, 5));
//! assert_eq!(vat.round2().to_string(), "€0.13");
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::error::ValidationError;

/// Decimal places used when presenting an amount.
pub const PRESENTATION_PLACES: u32 = 2;

/// Tolerance for comparing stored totals against recomputed ones (0.01).
pub const MONEY_TOLERANCE: Money = Money(Decimal::from_parts(1, 0, 0, false, 2));

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in euro, held as an exact decimal.
///
/// ## Design Decisions
/// - **Decimal, not cents**: POS prices carry more than two fraction digits
///   and VAT on them must be summed unrounded.
/// - **Signed**: refunds and variances are negative.
/// - **serde transparent**: serializes as the decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero euro.
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Wraps an exact decimal amount.
    #[inline]
    pub const fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    /// Creates an amount from whole cents.
    ///
    /// ```rust
    /// use backoffice_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(12500).to_string(), "€125.00");
    /// ```
    #[inline]
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Creates an amount from whole euro.
    #[inline]
    pub fn from_euros(euros: i64) -> Self {
        Money(Decimal::from(euros))
    }

    /// Returns the exact decimal amount.
    #[inline]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Rounds to two decimals, half away from zero.
    ///
    /// ```rust
    /// use backoffice_core::money::Money;
    /// use rust_decimal::Decimal;
    ///
    /// assert_eq!(Money::new(Decimal::new(1005, 3)).round2(), Money::from_cents(101));
    /// assert_eq!(Money::new(Decimal::new(-1005, 3)).round2(), Money::from_cents(-101));
    /// ```
    pub fn round2(&self) -> Money {
        Money(
            self.0
                .round_dp_with_strategy(PRESENTATION_PLACES, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// VAT on this net amount at `rate`, unrounded.
    #[inline]
    pub fn calculate_vat(&self, rate: Decimal) -> Money {
        Money(self.0 * rate)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    #[inline]
    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    /// Larger of this amount and zero.
    #[inline]
    pub fn clamp_non_negative(&self) -> Money {
        if self.is_negative() {
            Money::ZERO
        } else {
            *self
        }
    }

    /// True when the two amounts differ by no more than [`MONEY_TOLERANCE`].
    pub fn approx_eq(&self, other: Money) -> bool {
        (*self - other).abs() <= MONEY_TOLERANCE
    }

    /// Renders the rounded amount without currency symbol or grouping,
    /// e.g. `1234.50`. Used for CSV cells.
    pub fn to_plain_string(&self) -> String {
        format!("{:.2}", self.round2().0)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Displays the amount rounded to cents with thousands grouping: `-€1,234.50`.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = self.round2();
        let sign = if rounded.is_negative() { "-" } else { "" };
        let plain = format!("{:.2}", rounded.0.abs());
        let (whole, fraction) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

        let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
        for (i, ch) in whole.chars().enumerate() {
            if i > 0 && (whole.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }

        write!(f, "{}€{}.{}", sign, grouped, fraction)
    }
}

impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Money)
            .map_err(|e| ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: e.to_string(),
            })
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money(amount)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

/// Multiplication by a quantity or factor.
impl Mul<Decimal> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Decimal) -> Self {
        Money(self.0 * factor)
    }
}

/// Multiplication by a whole count (denomination counts).
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, count: i64) -> Self {
        Money(self.0 * Decimal::from(count))
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "€10.99");
        assert_eq!(Money::from_cents(-550).to_string(), "-€5.50");
        assert_eq!(Money::ZERO.to_string(), "€0.00");
        assert_eq!(m("1234567.5").to_string(), "€1,234,567.50");
        assert_eq!(m("999.999").to_string(), "€1,000.00");
    }

    #[test]
    fn test_round_half_up() {
        assert_eq!(m("0.125").round2(), m("0.13"));
        assert_eq!(m("0.135").round2(), m("0.14"));
        assert_eq!(m("-0.125").round2(), m("-0.13"));
        assert_eq!(m("0.1249").round2(), m("0.12"));
    }

    #[test]
    fn test_vat_is_not_rounded_per_line() {
        let rate = Decimal::new(135, 3);
        let line = Money::from_cents(99);
        let total: Money = (0..10_000).map(|_| line.calculate_vat(rate)).sum();
        assert_eq!(total.round2(), m("1336.50"));
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(250);
        assert_eq!(a + b, Money::from_cents(1250));
        assert_eq!(a - b, Money::from_cents(750));
        assert_eq!(-b, Money::from_cents(-250));
        assert_eq!(Money::from_euros(50) * 2_i64, Money::from_euros(100));
        assert_eq!((b - a).clamp_non_negative(), Money::ZERO);
    }

    #[test]
    fn test_approx_eq() {
        assert!(m("10.00").approx_eq(m("10.01")));
        assert!(!m("10.00").approx_eq(m("10.02")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("12,50".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
    }

    #[test]
    fn test_plain_string() {
        assert_eq!(m("125").to_plain_string(), "125.00");
        assert_eq!(m("-5.005").to_plain_string(), "-5.01");
    }

    #[test]
    fn test_serde_as_decimal_string() {
        let json = serde_json::to_string(&m("12.50")).unwrap();
        assert_eq!(json, "\"12.50\"");
    }
}
