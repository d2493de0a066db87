//! # Shared Types
//!
//! Small value types used by more than one accounting module.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::validation::ValidationResult;

// =============================================================================
// Date Range
// =============================================================================

/// Inclusive calendar date range `[start, end]`.
///
/// Every report, aggregation and import operates on one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting `end < start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> ValidationResult<Self> {
        if end < start {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(DateRange { start, end })
    }

    /// Single-day range.
    pub fn day(date: NaiveDate) -> Self {
        DateRange {
            start: date,
            end: date,
        }
    }

    /// Number of days covered, counting both ends.
    pub fn days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// The range of equal length immediately before this one.
    ///
    /// ```rust
    /// use backoffice_core::DateRange;
    /// use chrono::NaiveDate;
    ///
    /// let march = DateRange::new(
    ///     NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
    ///     NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
    /// ).unwrap();
    /// let prev = march.previous();
    /// assert_eq!(prev.start, NaiveDate::from_ymd_opt(2025, 1, 29).unwrap());
    /// assert_eq!(prev.end, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
    /// ```
    pub fn previous(&self) -> DateRange {
        let len = Days::new(self.days());
        DateRange {
            start: self.start.checked_sub_days(len).unwrap_or(NaiveDate::MIN),
            end: self
                .end
                .checked_sub_days(len)
                .unwrap_or(NaiveDate::MIN),
        }
    }

    /// Iterates every date in the range.
    pub fn iter_days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// True for Monday through Friday.
pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_new_rejects_reversed_range() {
        assert!(DateRange::new(date(2025, 3, 2), date(2025, 3, 1)).is_err());
        assert!(DateRange::new(date(2025, 3, 1), date(2025, 3, 1)).is_ok());
    }

    #[test]
    fn test_days_and_previous() {
        let week = DateRange::new(date(2025, 3, 10), date(2025, 3, 16)).unwrap();
        assert_eq!(week.days(), 7);
        let prev = week.previous();
        assert_eq!(prev, DateRange::new(date(2025, 3, 3), date(2025, 3, 9)).unwrap());
        assert_eq!(week.iter_days().count(), 7);
        assert!(week.contains(date(2025, 3, 16)));
        assert!(!week.contains(date(2025, 3, 17)));
    }

    #[test]
    fn test_is_weekday() {
        assert!(is_weekday(date(2025, 3, 14))); // Friday
        assert!(!is_weekday(date(2025, 3, 15)));
        assert!(!is_weekday(date(2025, 3, 16)));
    }
}
