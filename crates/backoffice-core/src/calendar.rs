//! # Filing Calendar
//!
//! Bi-monthly VAT filing periods, deadlines and the outstanding-period
//! detector. Today's date always comes from an injected [`Clock`].
//!
//! ## Outstanding Period Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  start_year = 2024, grace_days = 15, today = 2024-03-20                 │
//! │                                                                         │
//! │  Jan-Feb 2024   2024-01-01 … 2024-02-29   grace end 2024-03-15          │
//! │     ended? yes   grace elapsed? yes (03-20 > 03-15)                     │
//! │     return covering the period? no   unassigned invoices? 1             │
//! │     → OUTSTANDING, 5 days overdue                                       │
//! │                                                                         │
//! │  Mar-Apr 2024   2024-03-01 … 2024-04-30                                 │
//! │     ended? no → skipped                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A return "covers" a filing period when its own span lies inside it. The
//! return's span comes from its monthly rule, so a single-month return
//! inside Jan-Feb still counts.

use chrono::{Datelike, Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::validation::ValidationResult;

// =============================================================================
// Clock
// =============================================================================

/// Source of today's date.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock stuck on one date, for tests and back-dated reports.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

// =============================================================================
// Calendar Configuration
// =============================================================================

/// One filing period within a year, by month numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingPeriodDef {
    pub start_month: u32,
    pub end_month: u32,
    pub label: String,
}

impl FilingPeriodDef {
    fn new(start_month: u32, end_month: u32, label: &str) -> Self {
        FilingPeriodDef {
            start_month,
            end_month,
            label: label.to_string(),
        }
    }
}

/// Filing calendar settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingCalendar {
    /// First year checked for outstanding periods.
    #[serde(default = "default_start_year")]
    pub start_year: i32,

    /// Days after a period ends before its return is due.
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,

    #[serde(default = "default_periods")]
    pub periods: Vec<FilingPeriodDef>,
}

fn default_start_year() -> i32 {
    2024
}

fn default_grace_days() -> u32 {
    15
}

fn default_periods() -> Vec<FilingPeriodDef> {
    vec![
        FilingPeriodDef::new(1, 2, "Jan-Feb"),
        FilingPeriodDef::new(3, 4, "Mar-Apr"),
        FilingPeriodDef::new(5, 6, "May-Jun"),
        FilingPeriodDef::new(7, 8, "Jul-Aug"),
        FilingPeriodDef::new(9, 10, "Sep-Oct"),
        FilingPeriodDef::new(11, 12, "Nov-Dec"),
    ]
}

impl Default for FilingCalendar {
    fn default() -> Self {
        FilingCalendar {
            start_year: default_start_year(),
            grace_days: default_grace_days(),
            periods: default_periods(),
        }
    }
}

/// A concrete filing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingPeriod {
    pub year: i32,
    /// e.g. `Jan-Feb 2024`.
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FilingPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// True when a return spanning `[start, end]` lies inside this period.
    pub fn is_covered_by(&self, span: &ReturnSpan) -> bool {
        span.period_start >= self.start && span.period_end <= self.end
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.checked_sub_days(Days::new(1))
}

impl FilingCalendar {
    /// Rejects an empty table, bad month numbers and overlapping periods.
    pub fn validate(&self) -> ValidationResult<()> {
        if self.periods.is_empty() {
            return Err(ValidationError::Required {
                field: "filing.periods".to_string(),
            });
        }

        let mut previous_end = 0;
        for def in &self.periods {
            if def.start_month < 1 || def.end_month > 12 || def.start_month > def.end_month {
                return Err(ValidationError::OutOfRange {
                    field: format!("filing.periods[{}]", def.label),
                    min: "1".to_string(),
                    max: "12".to_string(),
                });
            }
            if def.start_month <= previous_end {
                return Err(ValidationError::InvalidFormat {
                    field: "filing.periods".to_string(),
                    reason: format!("{} overlaps or is out of order", def.label),
                });
            }
            previous_end = def.end_month;
        }
        Ok(())
    }

    /// Concrete periods of `year`, in table order.
    pub fn periods_in_year(&self, year: i32) -> Vec<FilingPeriod> {
        self.periods
            .iter()
            .filter_map(|def| {
                Some(FilingPeriod {
                    year,
                    label: format!("{} {}", def.label, year),
                    start: NaiveDate::from_ymd_opt(year, def.start_month, 1)?,
                    end: last_day_of_month(year, def.end_month)?,
                })
            })
            .collect()
    }

    /// The filing period containing `date`, if the table covers it.
    pub fn period_containing(&self, date: NaiveDate) -> Option<FilingPeriod> {
        self.periods_in_year(date.year())
            .into_iter()
            .find(|p| p.contains(date))
    }

    /// Start of the filing period containing `date`.
    ///
    /// Not to be confused with [`crate::vat_return::return_period_start`],
    /// which is always the first of the month.
    pub fn filing_period_start(&self, date: NaiveDate) -> Option<NaiveDate> {
        self.period_containing(date).map(|p| p.start)
    }

    /// Last day of the grace period after `period`.
    pub fn deadline(&self, period: &FilingPeriod) -> NaiveDate {
        period
            .end
            .checked_add_days(Days::new(u64::from(self.grace_days)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// First deadline on or after `today`, looking into next year if needed.
    pub fn next_deadline(&self, today: NaiveDate) -> Option<NaiveDate> {
        self.periods_in_year(today.year())
            .iter()
            .map(|p| self.deadline(p))
            .find(|d| *d >= today)
            .or_else(|| {
                self.periods_in_year(today.year() + 1)
                    .first()
                    .map(|p| self.deadline(p))
            })
    }
}

// =============================================================================
// Outstanding Period Detection
// =============================================================================

/// Date span of an existing VAT return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSpan {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// A filing period whose return is overdue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingPeriod {
    pub period: FilingPeriod,
    pub grace_end: NaiveDate,
    /// Unassigned invoices dated inside the period.
    pub invoice_count: i64,
    pub days_overdue: i64,
}

fn count_in(period: &FilingPeriod, dates: &[NaiveDate], up_to: NaiveDate) -> i64 {
    dates
        .iter()
        .filter(|d| period.contains(**d) && **d <= up_to)
        .count() as i64
}

/// Finds every filing period from `start_year` through this year that has
/// ended, is past its grace period, has no covering return and still has
/// unassigned invoices.
pub fn detect_outstanding(
    calendar: &FilingCalendar,
    clock: &dyn Clock,
    returns: &[ReturnSpan],
    unassigned_invoice_dates: &[NaiveDate],
) -> Vec<OutstandingPeriod> {
    let today = clock.today();
    let mut outstanding = Vec::new();

    for year in calendar.start_year..=today.year() {
        for period in calendar.periods_in_year(year) {
            if period.end > today {
                continue;
            }
            let grace_end = calendar.deadline(&period);
            if today <= grace_end {
                continue;
            }
            if returns.iter().any(|span| period.is_covered_by(span)) {
                continue;
            }

            let invoice_count = count_in(&period, unassigned_invoice_dates, period.end);
            if invoice_count > 0 {
                outstanding.push(OutstandingPeriod {
                    days_overdue: (today - grace_end).num_days(),
                    period,
                    grace_end,
                    invoice_count,
                });
            }
        }
    }

    outstanding
}

/// The filing period today falls in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentPeriodInfo {
    pub period: FilingPeriod,
    pub days_remaining: i64,
    pub return_exists: bool,
    /// Unassigned invoices from the period start through today.
    pub invoice_count: i64,
}

pub fn current_period_info(
    calendar: &FilingCalendar,
    clock: &dyn Clock,
    returns: &[ReturnSpan],
    unassigned_invoice_dates: &[NaiveDate],
) -> Option<CurrentPeriodInfo> {
    let today = clock.today();
    let period = calendar.period_containing(today)?;

    Some(CurrentPeriodInfo {
        days_remaining: (period.end - today).num_days(),
        return_exists: returns.iter().any(|span| period.is_covered_by(span)),
        invoice_count: count_in(&period, unassigned_invoice_dates, today),
        period,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
