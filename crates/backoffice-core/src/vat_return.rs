//! # VAT Returns
//!
//! Lifecycle rules for VAT returns and the figures derived from them.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create_draft(ids)            finalize()          mark_submitted()     │
//! │  ─────────────────►  DRAFT ───────────────► FINALIZED ──────────► SUBMITTED
//! │                      │  ▲                   totals locked               │
//! │   add / remove ◄─────┘  │                   membership locked       mark_paid()
//! │   recalculate ──────────┘                                               ▼
//! │                                                                       PAID
//! │   destroy() only while DRAFT: invoices are released first              │
//! │                                                                         │
//! │   Anything else → ImmutableReturn / InvalidTransition                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::invoice::{Invoice, VatBuckets};
use crate::money::Money;
use crate::validation::{validate_optional, validate_required, ValidationResult};

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum VatReturnStatus {
    Draft,
    Finalized,
    Submitted,
    Paid,
}

impl VatReturnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VatReturnStatus::Draft => "draft",
            VatReturnStatus::Finalized => "finalized",
            VatReturnStatus::Submitted => "submitted",
            VatReturnStatus::Paid => "paid",
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, VatReturnStatus::Draft)
    }
}

impl fmt::Display for VatReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VatReturnStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(VatReturnStatus::Draft),
            "finalized" => Ok(VatReturnStatus::Finalized),
            "submitted" => Ok(VatReturnStatus::Submitted),
            "paid" => Ok(VatReturnStatus::Paid),
            other => Err(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: format!("unknown VAT return status '{}'", other),
            }),
        }
    }
}

/// Checks a status change against the lifecycle.
pub fn transition(from: VatReturnStatus, to: VatReturnStatus) -> CoreResult<()> {
    use VatReturnStatus::*;
    match (from, to) {
        (Draft, Finalized) | (Finalized, Submitted) | (Submitted, Paid) => Ok(()),
        _ => Err(CoreError::InvalidTransition { from, to }),
    }
}

// =============================================================================
// Totals
// =============================================================================

/// Stored totals of a return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTotals {
    pub total_net: Money,
    pub total_vat: Money,
    pub total_gross: Money,
    pub buckets: VatBuckets,
}

impl ReturnTotals {
    /// Sums the owned invoices. No invoices gives zero totals.
    pub fn from_invoices<'a>(invoices: impl IntoIterator<Item = &'a Invoice>) -> Self {
        let mut totals = ReturnTotals::default();
        for invoice in invoices {
            totals.total_net += invoice.subtotal;
            totals.total_vat += invoice.vat_amount;
            totals.total_gross += invoice.total_amount;
            totals.buckets += invoice.buckets;
        }
        totals
    }
}

// =============================================================================
// VAT Return
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatReturn {
    pub id: String,
    /// Unique label, e.g. `2025-03`.
    pub return_period: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: VatReturnStatus,
    pub totals: ReturnTotals,
    pub notes: Option<String>,
    pub submitted_date: Option<NaiveDate>,
    pub reference_number: Option<String>,
    /// Entered after the fact for a period filed outside the system.
    pub is_historical: bool,
    pub created_by: Option<String>,
    pub finalized_by: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VatReturn {
    /// Fails with `ImmutableReturn` unless the return is a draft.
    pub fn ensure_draft(&self) -> CoreResult<()> {
        if self.status.is_draft() {
            Ok(())
        } else {
            Err(CoreError::ImmutableReturn {
                return_id: self.id.clone(),
                status: self.status,
            })
        }
    }

    /// Stored totals must match their buckets within 0.01.
    pub fn check_totals(&self) -> CoreResult<()> {
        let t = &self.totals;
        let checks = [
            ("total_net", t.total_net, t.buckets.subtotal()),
            ("total_vat", t.total_vat, t.buckets.vat_total()),
            ("total_gross", t.total_gross, t.total_net + t.total_vat),
        ];
        for (field, stored, expected) in checks {
            if !stored.approx_eq(expected) {
                return Err(CoreError::TotalsMismatch {
                    entity: format!("VAT return {}", self.return_period),
                    detail: format!("{} is {} but buckets give {}", field, stored, expected),
                });
            }
        }
        Ok(())
    }

    /// All checks `finalize` performs before locking.
    pub fn check_finalizable(&self, invoice_count: i64) -> CoreResult<()> {
        self.ensure_draft()?;
        self.check_contents(invoice_count)
    }

    /// The status-independent half of [`check_finalizable`](Self::check_finalizable):
    /// at least one invoice and consistent totals.
    pub fn check_contents(&self, invoice_count: i64) -> CoreResult<()> {
        if invoice_count == 0 {
            return Err(CoreError::EmptyReturn(self.id.clone()));
        }
        self.check_totals()
    }
}

// =============================================================================
// Periods
// =============================================================================

/// First day of the month containing `period_end`.
///
/// This is the return's own period rule and differs from the bi-monthly
/// filing calendar in [`crate::calendar`].
pub fn return_period_start(period_end: NaiveDate) -> NaiveDate {
    period_end.with_day(1).unwrap_or(period_end)
}

/// Default label for a return ending on `date`: `YYYY-MM`.
pub fn generate_return_period(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

// =============================================================================
// Draft Request
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVatReturn {
    pub return_period: String,
    pub period_end: NaiveDate,
    pub invoice_ids: Vec<String>,
    pub notes: Option<String>,
    pub is_historical: bool,
    pub created_by: Option<String>,
}

impl NewVatReturn {
    /// Validates the request and returns the distinct invoice ids in input order.
    pub fn validate(&self) -> ValidationResult<Vec<String>> {
        validate_required("return_period", &self.return_period, 100)?;
        validate_optional("notes", self.notes.as_deref(), 2000)?;
        distinct_ids(&self.invoice_ids)
    }
}

/// Trims and de-duplicates ids. An empty result is an error.
pub fn distinct_ids(ids: &[String]) -> ValidationResult<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "invoice_ids".to_string(),
            });
        }
        if seen.insert(id.to_string()) {
            out.push(id.to_string());
        }
    }
    if out.is_empty() {
        return Err(ValidationError::Required {
            field: "invoice_ids".to_string(),
        });
    }
    Ok(out)
}

// =============================================================================
// ROS Figures
// =============================================================================

/// Box figures of the Revenue Online Service VAT3 form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosFigures {
    /// VAT on sales.
    pub t1: Money,
    /// VAT on purchases.
    pub t2: Money,
    /// Net payable.
    pub t3: Money,
    /// Net repayable.
    pub t4: Money,
    /// Intra-EU goods supplied.
    pub e1: Money,
    /// Intra-EU goods acquired.
    pub e2: Money,
}

impl RosFigures {
    pub fn compute(sales_vat: Money, purchase_vat: Money) -> Self {
        RosFigures {
            t1: sales_vat,
            t2: purchase_vat,
            t3: (sales_vat - purchase_vat).clamp_non_negative(),
            t4: (purchase_vat - sales_vat).clamp_non_negative(),
            e1: Money::ZERO,
            e2: Money::ZERO,
        }
    }

    /// Same figures rounded to cents for filing.
    pub fn rounded(&self) -> Self {
        RosFigures {
            t1: self.t1.round2(),
            t2: self.t2.round2(),
            t3: self.t3.round2(),
            t4: self.t4.round2(),
            e1: self.e1.round2(),
            e2: self.e2.round2(),
        }
    }
}

// =============================================================================
// Yearly Statistics
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearlyStats {
    pub year: i32,
    pub return_count: i64,
    pub total_net: Money,
    pub total_vat: Money,
    pub total_gross: Money,
}

impl YearlyStats {
    /// Sums returns whose period ends in `year`.
    pub fn for_year<'a>(year: i32, returns: impl IntoIterator<Item = &'a VatReturn>) -> Self {
        let mut stats = YearlyStats {
            year,
            ..Default::default()
        };
        for r in returns.into_iter().filter(|r| r.period_end.year() == year) {
            stats.return_count += 1;
            stats.total_net += r.totals.total_net;
            stats.total_vat += r.totals.total_vat;
            stats.total_gross += r.totals.total_gross;
        }
        stats
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vat_rate::VatRateCode;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn sample_return(status: VatReturnStatus) -> VatReturn {
        let now = Utc::now();
        VatReturn {
            id: "r-1".to_string(),
            return_period: "2025-02".to_string(),
            period_start: date(2025, 2, 1),
            period_end: date(2025, 2, 28),
            status,
            totals: ReturnTotals::default(),
            notes: None,
            submitted_date: None,
            reference_number: None,
            is_historical: false,
            created_by: None,
            finalized_by: None,
            finalized_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transitions() {
        use VatReturnStatus::*;
        assert!(transition(Draft, Finalized).is_ok());
        assert!(transition(Finalized, Submitted).is_ok());
        assert!(transition(Submitted, Paid).is_ok());

        assert!(matches!(
            transition(Draft, Submitted),
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(transition(Finalized, Draft).is_err());
        assert!(transition(Paid, Submitted).is_err());
    }

    #[test]
    fn test_ensure_draft() {
        assert!(sample_return(VatReturnStatus::Draft).ensure_draft().is_ok());
        let err = sample_return(VatReturnStatus::Finalized)
            .ensure_draft()
            .unwrap_err();
        assert!(matches!(err, CoreError::ImmutableReturn { .. }));
    }

    #[test]
    fn test_finalize_checks() {
        let mut vat_return = sample_return(VatReturnStatus::Draft);
        assert!(matches!(
            vat_return.check_finalizable(0),
            Err(CoreError::EmptyReturn(_))
        ));

        let mut buckets = VatBuckets::default();
        buckets.add(VatRateCode::Standard, m("100"), m("23"));
        vat_return.totals = ReturnTotals {
            total_net: m("100"),
            total_vat: m("23"),
            total_gross: m("123"),
            buckets,
        };
        assert!(vat_return.check_finalizable(1).is_ok());

        vat_return.totals.total_vat = m("24");
        assert!(matches!(
            vat_return.check_finalizable(1),
            Err(CoreError::TotalsMismatch { .. })
        ));

        vat_return.totals.total_vat = m("23");
        vat_return.status = VatReturnStatus::Finalized;
        assert!(vat_return.check_contents(1).is_ok());
        assert!(matches!(
            vat_return.check_finalizable(1),
            Err(CoreError::ImmutableReturn { .. })
        ));
    }

    #[test]
    fn test_return_period_helpers() {
        assert_eq!(return_period_start(date(2024, 2, 29)), date(2024, 2, 1));
        assert_eq!(return_period_start(date(2024, 4, 30)), date(2024, 4, 1));
        assert_eq!(generate_return_period(date(2025, 3, 31)), "2025-03");
    }

    #[test]
    fn test_distinct_ids() {
        let ids = vec!["a".to_string(), " b ".to_string(), "a".to_string()];
        assert_eq!(distinct_ids(&ids).unwrap(), vec!["a", "b"]);
        assert!(distinct_ids(&[]).is_err());
        assert!(distinct_ids(&["".to_string()]).is_err());
    }

    #[test]
    fn test_ros_figures() {
        let payable = RosFigures::compute(m("500.00"), m("120.50"));
        assert_eq!(payable.t3, m("379.50"));
        assert_eq!(payable.t4, Money::ZERO);

        let repayable = RosFigures::compute(m("100"), m("130.25"));
        assert_eq!(repayable.t3, Money::ZERO);
        assert_eq!(repayable.t4, m("30.25"));
        assert_eq!(repayable.e1, Money::ZERO);
    }

    #[test]
    fn test_yearly_stats() {
        let mut a = sample_return(VatReturnStatus::Finalized);
        a.totals.total_vat = m("10");
        let mut b = a.clone();
        b.period_end = date(2024, 12, 31);
        let stats = YearlyStats::for_year(2025, [&a, &b]);
        assert_eq!(stats.return_count, 1);
        assert_eq!(stats.total_vat, m("10"));
    }
}
