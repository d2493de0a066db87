//! # VAT Rate Table
//!
//! Time-versioned lookup of the four Irish VAT rate codes.
//!
//! ## Range Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  code = REDUCED                                                         │
//! │                                                                         │
//! │  2011-01-01 ─────────────── 2020-08-31   2020-09-01 ──────── (open)     │
//! │  │        13.5%            │            │       12.5%        │          │
//! │  └─────────────────────────┘            └────────────────────┘          │
//! │                                                                         │
//! │  rate_for(REDUCED, 2020-08-15) → 0.135                                 │
//! │  rate_for(REDUCED, 2020-10-01) → 0.125                                 │
//! │  rate_for(REDUCED, 2010-12-31) → NoApplicableRate                      │
//! │                                                                         │
//! │  A rate change never edits a used range: insert_range() closes the     │
//! │  open range on the day before and appends the successor.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

// =============================================================================
// Rate Code
// =============================================================================

/// Closed set of VAT rate classifications (the "VAT buckets").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VatRateCode {
    /// 23%
    Standard,
    /// 13.5%
    Reduced,
    /// 9%
    SecondReduced,
    /// 0%
    Zero,
}

impl VatRateCode {
    /// All codes in bucket order.
    pub const ALL: [VatRateCode; 4] = [
        VatRateCode::Standard,
        VatRateCode::Reduced,
        VatRateCode::SecondReduced,
        VatRateCode::Zero,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VatRateCode::Standard => "STANDARD",
            VatRateCode::Reduced => "REDUCED",
            VatRateCode::SecondReduced => "SECOND_REDUCED",
            VatRateCode::Zero => "ZERO",
        }
    }

    /// Display name used for the seeded range.
    pub fn label(&self) -> &'static str {
        match self {
            VatRateCode::Standard => "Standard Rate",
            VatRateCode::Reduced => "Reduced Rate",
            VatRateCode::SecondReduced => "Second Reduced Rate",
            VatRateCode::Zero => "Zero Rate",
        }
    }

    /// Rate seeded for this code.
    pub fn default_rate(&self) -> Decimal {
        match self {
            VatRateCode::Standard => Decimal::new(23, 2),
            VatRateCode::Reduced => Decimal::new(135, 3),
            VatRateCode::SecondReduced => Decimal::new(9, 2),
            VatRateCode::Zero => Decimal::ZERO,
        }
    }
}

impl fmt::Display for VatRateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VatRateCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "STANDARD" => Ok(VatRateCode::Standard),
            "REDUCED" => Ok(VatRateCode::Reduced),
            "SECOND_REDUCED" => Ok(VatRateCode::SecondReduced),
            "ZERO" => Ok(VatRateCode::Zero),
            other => Err(ValidationError::InvalidFormat {
                field: "vat_rate_code".to_string(),
                reason: format!(
                    "unknown code '{}'. Valid options: STANDARD, REDUCED, SECOND_REDUCED, ZERO",
                    other
                ),
            }),
        }
    }
}

// =============================================================================
// Rate Range
// =============================================================================

/// One effective range of a rate code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatRate {
    pub code: VatRateCode,
    pub name: String,
    /// Fraction between 0 and 1 (0.23 = 23%).
    pub rate: Decimal,
    pub effective_from: NaiveDate,
    /// Inclusive end; `None` means open-ended.
    pub effective_to: Option<NaiveDate>,
}

impl VatRate {
    /// True when `date` falls inside this range.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_to.map_or(true, |to| to >= date)
    }

    fn overlaps(&self, other: &VatRate) -> bool {
        let self_end = self.effective_to.unwrap_or(NaiveDate::MAX);
        let other_end = other.effective_to.unwrap_or(NaiveDate::MAX);
        self.effective_from <= other_end && other.effective_from <= self_end
    }
}

/// Date the seeded Irish rates take effect.
pub fn seed_effective_from() -> NaiveDate {
    NaiveDate::from_ymd_opt(2011, 1, 1).unwrap_or(NaiveDate::MIN)
}

// =============================================================================
// Rate Table
// =============================================================================

/// All known ranges, validated to never overlap within a code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatRateTable {
    ranges: Vec<VatRate>,
}

impl VatRateTable {
    /// Builds a table, rejecting overlapping ranges and out-of-range rates.
    pub fn new(ranges: Vec<VatRate>) -> CoreResult<Self> {
        let mut table = VatRateTable { ranges: Vec::new() };
        for range in ranges {
            table.push_checked(range)?;
        }
        Ok(table)
    }

    /// The four Irish rates, effective from 2011-01-01 and open-ended.
    pub fn irish_defaults() -> Self {
        let effective_from = seed_effective_from();
        VatRateTable {
            ranges: VatRateCode::ALL
                .iter()
                .map(|code| VatRate {
                    code: *code,
                    name: code.label().to_string(),
                    rate: code.default_rate(),
                    effective_from,
                    effective_to: None,
                })
                .collect(),
        }
    }

    pub fn ranges(&self) -> &[VatRate] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns the range of `code` covering `as_of`.
    pub fn range_for(&self, code: VatRateCode, as_of: NaiveDate) -> CoreResult<&VatRate> {
        self.ranges
            .iter()
            .find(|r| r.code == code && r.covers(as_of))
            .ok_or(CoreError::NoApplicableRate { code, date: as_of })
    }

    /// Returns the rate of `code` effective on `as_of`.
    ///
    /// ## Errors
    /// `NoApplicableRate` when no range covers the date. There is no
    /// fallback, not even for `ZERO`.
    pub fn rate_for(&self, code: VatRateCode, as_of: NaiveDate) -> CoreResult<Decimal> {
        self.range_for(code, as_of).map(|r| r.rate)
    }

    /// Maps a raw rate (as stored on a POS tax line) to its code on `as_of`.
    ///
    /// Comparison is numeric, so `0.230` and `0.23` match the same code.
    /// If two codes carry the same rate on that date, the one declared
    /// first in [`VatRateCode`] wins: 13.5% stays REDUCED even while
    /// SECOND_REDUCED is also 13.5%.
    pub fn code_for_rate(&self, rate: Decimal, as_of: NaiveDate) -> CoreResult<VatRateCode> {
        self.ranges
            .iter()
            .filter(|r| r.rate == rate && r.covers(as_of))
            .map(|r| r.code)
            .min()
            .ok_or(CoreError::UnrecognizedRate { rate, date: as_of })
    }

    /// Records a rate change.
    ///
    /// Closes the open range of `code` on the day before `effective_from`
    /// and appends the new open-ended range. Returns the closed range, if any.
    pub fn insert_range(
        &mut self,
        code: VatRateCode,
        name: impl Into<String>,
        rate: Decimal,
        effective_from: NaiveDate,
    ) -> CoreResult<Option<VatRate>> {
        validate_rate(rate)?;

        let new_range = VatRate {
            code,
            name: name.into(),
            rate,
            effective_from,
            effective_to: None,
        };

        let open_index = self
            .ranges
            .iter()
            .position(|r| r.code == code && r.effective_to.is_none());

        let closed = match open_index {
            Some(index) => {
                let open = &self.ranges[index];
                if effective_from <= open.effective_from {
                    return Err(ValidationError::OutOfRange {
                        field: "effective_from".to_string(),
                        min: open.effective_from.to_string(),
                        max: "open".to_string(),
                    }
                    .into());
                }
                let mut updated = open.clone();
                updated.effective_to = effective_from.checked_sub_days(Days::new(1));
                self.ranges[index] = updated.clone();
                Some(updated)
            }
            None => None,
        };

        self.push_checked(new_range)?;
        Ok(closed)
    }

    fn push_checked(&mut self, range: VatRate) -> CoreResult<()> {
        validate_rate(range.rate)?;

        if let Some(to) = range.effective_to {
            if to < range.effective_from {
                return Err(ValidationError::InvalidDateRange {
                    start: range.effective_from,
                    end: to,
                }
                .into());
            }
        }

        if self
            .ranges
            .iter()
            .any(|r| r.code == range.code && r.overlaps(&range))
        {
            return Err(ValidationError::InvalidFormat {
                field: "effective_from".to_string(),
                reason: format!(
                    "{} range starting {} overlaps an existing range",
                    range.code, range.effective_from
                ),
            }
            .into());
        }

        self.ranges.push(range);
        self.ranges
            .sort_by(|a, b| (a.code, a.effective_from).cmp(&(b.code, b.effective_from)));
        Ok(())
    }
}

/// Rates are fractions in `[0, 1)`.
pub(crate) fn validate_rate(rate: Decimal) -> CoreResult<()> {
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(ValidationError::OutOfRange {
            field: "rate".to_string(),
            min: "0".to_string(),
            max: "1".to_string(),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// Tax Math
// =============================================================================

/// VAT on a net amount, unrounded.
#[inline]
pub fn calculate_vat(net: Money, rate: Decimal) -> Money {
    net.calculate_vat(rate)
}

/// Gross amount for a net amount.
#[inline]
pub fn gross_from_net(net: Money, rate: Decimal) -> Money {
    net + net.calculate_vat(rate)
}

/// Net amount contained in a VAT-inclusive gross amount.
pub fn net_from_gross(gross: Money, rate: Decimal) -> Money {
    Money::new(gross.amount() / (Decimal::ONE + rate))
}

// =============================================================================
// Unit Tests
// =============================================================================
