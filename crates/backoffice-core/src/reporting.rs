//! # Reporting
//!
//! Read-only figures built from the other modules: profit & loss, the VAT
//! dashboard, financial alerts and the reconciliation CSV export.
//!
//! Nothing here decides an accounting rule. Every input arrives already
//! computed by `sales`, `invoice`, `reconciliation` or `calendar`.

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::calendar::{CurrentPeriodInfo, OutstandingPeriod};
use crate::invoice::{Invoice, InvoiceCostSummary};
use crate::money::Money;
use crate::reconciliation::{CashReconciliation, SupplierPayment};
use crate::sales::SalesSummary;
use crate::types::{is_weekday, DateRange};
use crate::vat_return::{VatReturn, YearlyStats};

// =============================================================================
// Profit & Loss
// =============================================================================

/// Revenue, costs and profit of one date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodFigures {
    pub range: DateRange,
    /// Customer revenue net of VAT and vouchers.
    pub revenue: Money,
    /// Net of paid invoices dated in the range.
    pub invoice_costs: Money,
    /// Supplier cash paid out of tills in the range.
    pub supplier_payments: Money,
    pub total_costs: Money,
    pub profit: Money,
    /// Profit as a percentage of revenue, two places; zero without revenue.
    pub margin_percent: Decimal,
}

impl PeriodFigures {
    pub fn compute(
        range: DateRange,
        revenue: Money,
        invoice_costs: Money,
        supplier_payments: Money,
    ) -> Self {
        let total_costs = invoice_costs + supplier_payments;
        let profit = revenue - total_costs;
        let margin_percent = if revenue.is_zero() {
            Decimal::ZERO
        } else {
            (profit.amount() / revenue.amount() * Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        };

        PeriodFigures {
            range,
            revenue,
            invoice_costs,
            supplier_payments,
            total_costs,
            profit,
            margin_percent,
        }
    }
}

/// Profit & loss with the preceding period of equal length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitLoss {
    pub current: PeriodFigures,
    pub previous: PeriodFigures,
    pub sales: SalesSummary,
    pub invoice_costs: InvoiceCostSummary,
}

impl ProfitLoss {
    pub fn revenue_change(&self) -> Money {
        self.current.revenue - self.previous.revenue
    }

    pub fn profit_change(&self) -> Money {
        self.current.profit - self.previous.profit
    }
}

// =============================================================================
// Financial Alerts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Danger,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Danger => "danger",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialAlert {
    pub level: AlertLevel,
    pub message: String,
}

/// Limits that raise a financial alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Days without a reconciliation tolerated before warning.
    #[serde(default = "default_unreconciled_days")]
    pub unreconciled_days: i64,

    /// Absolute variance above which the latest count is flagged.
    #[serde(default = "default_variance_threshold")]
    pub variance_threshold: Money,

    /// Weekday customer revenue below which an info alert is raised.
    #[serde(default = "default_min_weekday_sales")]
    pub min_weekday_sales: Money,
}

fn default_unreconciled_days() -> i64 {
    1
}

fn default_variance_threshold() -> Money {
    Money::from_euros(50)
}

fn default_min_weekday_sales() -> Money {
    Money::from_euros(500)
}

impl Default for AlertThresholds {
    fn default() -> Self {
        AlertThresholds {
            unreconciled_days: default_unreconciled_days(),
            variance_threshold: default_variance_threshold(),
            min_weekday_sales: default_min_weekday_sales(),
        }
    }
}

/// Date and variance of the most recent reconciliation on any till.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestReconciliation {
    pub date: NaiveDate,
    pub variance: Money,
}

/// Alerts for `date`, most severe first.
pub fn financial_alerts(
    date: NaiveDate,
    latest: Option<LatestReconciliation>,
    day_revenue: Money,
    thresholds: &AlertThresholds,
) -> Vec<FinancialAlert> {
    let mut alerts = Vec::new();

    if let Some(latest) = latest {
        let days_since = (date - latest.date).num_days();
        if days_since > thresholds.unreconciled_days {
            alerts.push(FinancialAlert {
                level: AlertLevel::Warning,
                message: format!("Cash not reconciled for {} days", days_since),
            });
        }
        if latest.variance.abs() > thresholds.variance_threshold {
            alerts.push(FinancialAlert {
                level: AlertLevel::Danger,
                message: format!(
                    "Large cash variance detected: {}",
                    latest.variance.abs()
                ),
            });
        }
    }

    if is_weekday(date) && day_revenue < thresholds.min_weekday_sales {
        alerts.push(FinancialAlert {
            level: AlertLevel::Info,
            message: format!("Sales below {} threshold", thresholds.min_weekday_sales),
        });
    }

    alerts.sort_by(|a, b| b.level.cmp(&a.level));
    alerts
}

// =============================================================================
// VAT Dashboard
// =============================================================================

/// Unassigned invoices of one month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyUnsubmitted {
    pub year: i32,
    pub month: u32,
    pub count: i64,
    pub vat_total: Money,
}

/// Invoices not yet assigned to any VAT return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsubmittedSummary {
    pub count: i64,
    pub total_amount: Money,
    pub total_vat: Money,
    pub earliest_date: Option<NaiveDate>,
    pub latest_date: Option<NaiveDate>,
    /// Newest month first, at most twelve months.
    pub monthly: Vec<MonthlyUnsubmitted>,
}

impl UnsubmittedSummary {
    /// Assigned invoices in the input are ignored.
    pub fn from_invoices<'a>(invoices: impl IntoIterator<Item = &'a Invoice>) -> Self {
        let mut summary = UnsubmittedSummary::default();
        let mut months: BTreeMap<(i32, u32), MonthlyUnsubmitted> = BTreeMap::new();

        for invoice in invoices.into_iter().filter(|i| !i.is_assigned()) {
            summary.count += 1;
            summary.total_amount += invoice.total_amount;
            summary.total_vat += invoice.vat_amount;

            let d = invoice.invoice_date;
            summary.earliest_date = Some(summary.earliest_date.map_or(d, |e| e.min(d)));
            summary.latest_date = Some(summary.latest_date.map_or(d, |l| l.max(d)));

            let month = months
                .entry((d.year(), d.month()))
                .or_insert(MonthlyUnsubmitted {
                    year: d.year(),
                    month: d.month(),
                    count: 0,
                    vat_total: Money::ZERO,
                });
            month.count += 1;
            month.vat_total += invoice.vat_amount;
        }

        summary.monthly = months.into_values().rev().take(12).collect();
        summary
    }
}

/// Everything the VAT dashboard shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatDashboard {
    pub today: NaiveDate,
    pub outstanding: Vec<OutstandingPeriod>,
    pub current_period: Option<CurrentPeriodInfo>,
    pub next_deadline: Option<NaiveDate>,
    pub unsubmitted: UnsubmittedSummary,
    pub recent_returns: Vec<VatReturn>,
    /// Last year, then this year.
    pub yearly: Vec<YearlyStats>,
}

// =============================================================================
// Reconciliation CSV
// =============================================================================

pub const RECONCILIATION_CSV_HEADER: &str =
    "Date,Till,Total Cash,POS Cash,Variance,Card,Notes,Payments,Created By";

/// One reconciliation with what the export needs from its sub-ledgers.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationCsvRow<'a> {
    pub reconciliation: &'a CashReconciliation,
    pub payments: &'a [SupplierPayment],
    pub latest_note: Option<&'a str>,
}

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders the export, header first, one line per reconciliation.
pub fn reconciliation_csv(rows: &[ReconciliationCsvRow<'_>]) -> String {
    let mut out = String::from(RECONCILIATION_CSV_HEADER);
    out.push('\n');

    for row in rows {
        let rec = row.reconciliation;
        let payments = row
            .payments
            .iter()
            .map(|p| format!("{}: {}", p.payee_name, p.amount))
            .collect::<Vec<_>>()
            .join("; ");

        let fields = [
            rec.date.format("%Y-%m-%d").to_string(),
            csv_field(&rec.till_name),
            rec.total_cash_counted.to_plain_string(),
            rec.pos_cash_total.to_plain_string(),
            rec.variance.to_plain_string(),
            rec.payment_totals.card.to_plain_string(),
            csv_field(row.latest_note.unwrap_or("")),
            csv_field(&payments),
            csv_field(rec.created_by.as_deref().unwrap_or("")),
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::FloatCarryForward;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn test_period_figures() {
        let range = DateRange::new(date(2025, 3, 1), date(2025, 3, 31)).unwrap();
        let figures = PeriodFigures::compute(range, m("1000"), m("600"), m("150"));
        assert_eq!(figures.total_costs, m("750"));
        assert_eq!(figures.profit, m("250"));
        assert_eq!(figures.margin_percent, "25".parse::<Decimal>().unwrap());

        let empty = PeriodFigures::compute(range, Money::ZERO, m("10"), Money::ZERO);
        assert_eq!(empty.margin_percent, Decimal::ZERO);
        assert_eq!(empty.profit, m("-10"));
    }

    #[test]
    fn test_alerts() {
        let thresholds = AlertThresholds::default();
        // Friday
        let friday = date(2025, 3, 14);
        let latest = LatestReconciliation {
            date: date(2025, 3, 11),
            variance: m("-62.40"),
        };

        let alerts = financial_alerts(friday, Some(latest), m("320"), &thresholds);
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].level, AlertLevel::Danger);
        assert_eq!(alerts[0].message, "Large cash variance detected: €62.40");
        assert_eq!(alerts[1].message, "Cash not reconciled for 3 days");
        assert_eq!(alerts[2].message, "Sales below €500.00 threshold");

        // Saturday, reconciled yesterday, small variance
        let saturday = date(2025, 3, 15);
        let fresh = LatestReconciliation {
            date: date(2025, 3, 14),
            variance: m("50.00"),
        };
        assert!(financial_alerts(saturday, Some(fresh), m("0"), &thresholds).is_empty());
    }

    #[test]
    fn test_unsubmitted_summary_groups_by_month() {
        let base = Invoice {
            id: "i".to_string(),
            invoice_number: "1".to_string(),
            supplier_id: "s".to_string(),
            supplier_name: "S".to_string(),
            invoice_date: date(2025, 1, 10),
            due_date: None,
            buckets: Default::default(),
            subtotal: m("100"),
            vat_amount: m("23"),
            total_amount: m("123"),
            payment_status: Default::default(),
            payment_date: None,
            payment_method: None,
            payment_reference: None,
            expense_category: None,
            notes: None,
            external_id: None,
            vat_return_id: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let mut feb = base.clone();
        feb.invoice_date = date(2025, 2, 3);
        let mut assigned = base.clone();
        assigned.vat_return_id = Some("r".to_string());

        let summary = UnsubmittedSummary::from_invoices([&base, &feb, &assigned]);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.total_vat, m("46"));
        assert_eq!(summary.earliest_date, Some(date(2025, 1, 10)));
        assert_eq!(summary.monthly.len(), 2);
        assert_eq!(summary.monthly[0].month, 2);
    }

    #[test]
    fn test_reconciliation_csv() {
        let mut rec = CashReconciliation::draft(
            date(2025, 3, 10),
            1,
            "Till 1",
            FloatCarryForward::default(),
        );
        rec.total_cash_counted = m("125");
        rec.pos_cash_total = m("120");
        rec.variance = m("5");
        rec.payment_totals.card = m("1234.5");
        rec.created_by = Some("amy".to_string());

        let payments = vec![
            SupplierPayment {
                supplier_id: None,
                payee_name: "Milk Co".to_string(),
                amount: m("12.5"),
                sequence: 0,
                description: None,
            },
            SupplierPayment {
                supplier_id: None,
                payee_name: "Window cleaner".to_string(),
                amount: m("20"),
                sequence: 1,
                description: None,
            },
        ];

        let csv = reconciliation_csv(&[ReconciliationCsvRow {
            reconciliation: &rec,
            payments: &payments,
            latest_note: Some("Short, see manager"),
        }]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], RECONCILIATION_CSV_HEADER);
        assert_eq!(
            lines[1],
            "2025-03-10,Till 1,125.00,120.00,5.00,1234.50,\"Short, see manager\",Milk Co: €12.50; Window cleaner: €20.00,amy"
        );
    }
}
