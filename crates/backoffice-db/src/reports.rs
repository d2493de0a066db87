//! # Reports
//!
//! Read-only views that combine sales, invoices, reconciliations and VAT
//! returns. Nothing here writes.

use std::sync::Arc;

use backoffice_core::calendar::{current_period_info, detect_outstanding, Clock, FilingCalendar};
use backoffice_core::reporting::{
    financial_alerts, reconciliation_csv, AlertThresholds, FinancialAlert, LatestReconciliation,
    PeriodFigures, ProfitLoss, ReconciliationCsvRow, UnsubmittedSummary, VatDashboard,
};
use backoffice_core::vat_return::RosFigures;
use backoffice_core::DateRange;
use chrono::{Datelike, NaiveDate};
use tracing::debug;

use crate::aggregation::SalesEngine;
use crate::error::DbResult;
use crate::pool::Database;
use crate::pos::TransactionSource;

/// Returns shown on the VAT dashboard.
const RECENT_RETURNS: i64 = 5;

/// Report builder over the back office database and the POS.
#[derive(Clone)]
pub struct Reports {
    db: Database,
    sales: SalesEngine,
}

impl Reports {
    pub fn new(db: Database, pos: Arc<dyn TransactionSource>) -> Self {
        let sales = SalesEngine::new(db.clone(), pos);
        Reports { db, sales }
    }

    pub fn sales(&self) -> &SalesEngine {
        &self.sales
    }

    async fn period_figures(&self, range: DateRange) -> DbResult<PeriodFigures> {
        let revenue = self.sales.summary(range).await?.total_revenue;
        let invoice_costs = self.db.invoices().cost_summary(range).await?.paid_net;
        let supplier_payments = self.db.reconciliations().supplier_payments_total(range).await?;
        Ok(PeriodFigures::compute(range, revenue, invoice_costs, supplier_payments))
    }

    /// Profit & loss for the range, with the equally long period before it.
    pub async fn profit_loss(&self, range: DateRange) -> DbResult<ProfitLoss> {
        let sales = self.sales.summary(range).await?;
        let invoice_costs = self.db.invoices().cost_summary(range).await?;
        let supplier_payments = self.db.reconciliations().supplier_payments_total(range).await?;

        let current = PeriodFigures::compute(
            range,
            sales.total_revenue,
            invoice_costs.paid_net,
            supplier_payments,
        );
        let previous = self.period_figures(range.previous()).await?;

        debug!(
            start = %range.start,
            end = %range.end,
            revenue = %current.revenue,
            profit = %current.profit,
            "Built profit and loss"
        );

        Ok(ProfitLoss {
            current,
            previous,
            sales,
            invoice_costs,
        })
    }

    /// Outstanding periods, the current period, deadlines, unassigned
    /// invoices and recent returns.
    pub async fn vat_dashboard(
        &self,
        calendar: &FilingCalendar,
        clock: &dyn Clock,
    ) -> DbResult<VatDashboard> {
        let today = clock.today();
        let returns = self.db.vat_returns();
        let spans = returns.spans().await?;
        let unassigned = self.db.invoices().list_unassigned().await?;
        let unassigned_dates: Vec<NaiveDate> = unassigned.iter().map(|i| i.invoice_date).collect();

        Ok(VatDashboard {
            today,
            outstanding: detect_outstanding(calendar, clock, &spans, &unassigned_dates),
            current_period: current_period_info(calendar, clock, &spans, &unassigned_dates),
            next_deadline: calendar.next_deadline(today),
            unsubmitted: UnsubmittedSummary::from_invoices(&unassigned),
            recent_returns: returns.recent(RECENT_RETURNS).await?,
            yearly: returns.yearly_stats(&[today.year() - 1, today.year()]).await?,
        })
    }

    /// VAT3 box figures for a return, rounded to cents.
    ///
    /// T1 comes from customer sales in the return's period, vouchers
    /// included and internal transfers excluded. T2 is the return's VAT.
    pub async fn ros_figures(&self, return_id: &str) -> DbResult<RosFigures> {
        let vat_return = self.db.vat_returns().get(return_id).await?;
        let range = DateRange::new(vat_return.period_start, vat_return.period_end)?;
        let sales = self.sales.summary(range).await?;

        Ok(RosFigures::compute(sales.vat_on_sales, vat_return.totals.total_vat).rounded())
    }

    /// Alerts for one day, most severe first.
    pub async fn financial_alerts(
        &self,
        date: NaiveDate,
        thresholds: &AlertThresholds,
    ) -> DbResult<Vec<FinancialAlert>> {
        let latest = self
            .db
            .reconciliations()
            .latest_on_or_before(date)
            .await?
            .map(|rec| LatestReconciliation {
                date: rec.date,
                variance: rec.variance,
            });
        let revenue = self.sales.summary(DateRange::day(date)).await?.total_revenue;

        Ok(financial_alerts(date, latest, revenue, thresholds))
    }

    /// CSV export of the reconciliations in the range.
    pub async fn reconciliation_csv(&self, range: DateRange, till_id: Option<i64>) -> DbResult<String> {
        let repo = self.db.reconciliations();
        let reconciliations = repo.in_range(range, till_id).await?;

        let mut ledgers = Vec::with_capacity(reconciliations.len());
        for rec in &reconciliations {
            match rec.id.as_deref() {
                Some(id) => ledgers.push((repo.payments(id).await?, repo.latest_note(id).await?)),
                None => ledgers.push((Vec::new(), None)),
            }
        }

        let rows: Vec<ReconciliationCsvRow<'_>> = reconciliations
            .iter()
            .zip(&ledgers)
            .map(|(reconciliation, (payments, note))| ReconciliationCsvRow {
                reconciliation,
                payments,
                latest_note: note.as_deref(),
            })
            .collect();

        Ok(reconciliation_csv(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::SqlitePosSource;
    use crate::test_support::{new_invoice, pos_fixture, seeded_db, PosSale};
    use backoffice_core::calendar::FixedClock;
    use backoffice_core::invoice::PaymentStatus;
    use backoffice_core::reconciliation::{
        DenominationCounts, ReconciliationInput, SupplierPaymentInput,
    };
    use backoffice_core::reporting::AlertLevel;
    use backoffice_core::vat_return::NewVatReturn;
    use backoffice_core::Money;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    async fn reports_with_sales() -> Reports {
        let db = seeded_db().await;
        let pos = pos_fixture().await;
        PosSale::new("r1", date(2025, 3, 10))
            .line("1000.00", "1", "tax-std")
            .payment("cash", "1230.00")
            .insert(&pos)
            .await;
        PosSale::new("r2", date(2025, 3, 10))
            .line("100.00", "1", "tax-zero")
            .payment("paperin", "100.00")
            .insert(&pos)
            .await;
        PosSale::new("r3", date(2025, 3, 11))
            .customer("cust-kitchen")
            .line("50.00", "1", "tax-std")
            .insert(&pos)
            .await;
        PosSale::new("r4", date(2025, 2, 20))
            .line("400.00", "1", "tax-std")
            .payment("cash", "492.00")
            .insert(&pos)
            .await;

        Reports::new(db, Arc::new(SqlitePosSource::new(pos)))
    }

    async fn save_reconciliation(db: &Database, day: NaiveDate, payout: &str, note: Option<&str>) {
        let repo = db.reconciliations();
        let draft = repo.open(day, 1, "Till 1", None).await.unwrap();
        let input = ReconciliationInput {
            counts: DenominationCounts {
                cash_50: 1,
                ..Default::default()
            },
            supplier_payments: vec![SupplierPaymentInput {
                supplier_id: None,
                payee_name: "Milk, Co".to_string(),
                amount: money(payout),
                description: None,
            }],
            note: note.map(str::to_string),
            user: "alice".to_string(),
            ..Default::default()
        };
        repo.save(&draft, &input).await.unwrap();
    }

    #[tokio::test]
    async fn test_profit_loss_with_previous_period() {
        let reports = reports_with_sales().await;
        let db = reports.db.clone();

        let rates = db.vat_rates().load().await.unwrap();
        let invoice = db
            .invoices()
            .create(&new_invoice("INV-1", date(2025, 3, 5)), &rates, &db.suppliers())
            .await
            .unwrap();
        db.invoices()
            .set_payment_status(&invoice.id, PaymentStatus::Paid, Some(date(2025, 3, 6)))
            .await
            .unwrap();
        db.invoices()
            .create(&new_invoice("INV-2", date(2025, 3, 7)), &rates, &db.suppliers())
            .await
            .unwrap();
        save_reconciliation(&db, date(2025, 3, 10), "30.00", None).await;

        let range = DateRange::new(date(2025, 3, 1), date(2025, 3, 31)).unwrap();
        let pl = reports.profit_loss(range).await.unwrap();

        // 1100 net of sales less the 100 voucher pass-through
        assert_eq!(pl.current.revenue, money("1000.00"));
        assert_eq!(pl.current.invoice_costs, money("170.00"));
        assert_eq!(pl.current.supplier_payments, money("30.00"));
        assert_eq!(pl.current.profit, money("800.00"));
        assert_eq!(pl.current.margin_percent, "80.00".parse::<Decimal>().unwrap());
        assert_eq!(pl.invoice_costs.pending_count, 1);

        assert_eq!(pl.previous.range.end, date(2025, 2, 28));
        assert_eq!(pl.previous.revenue, money("400.00"));
        assert_eq!(pl.revenue_change(), money("600.00"));
    }

    #[tokio::test]
    async fn test_profit_loss_without_revenue_has_zero_margin() {
        let reports = reports_with_sales().await;
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap();
        let pl = reports.profit_loss(range).await.unwrap();
        assert_eq!(pl.current.margin_percent, Decimal::ZERO);
        assert_eq!(pl.current.profit, Money::ZERO);
    }

    #[tokio::test]
    async fn test_dashboard_reports_outstanding_period() {
        let reports = reports_with_sales().await;
        let db = reports.db.clone();
        let rates = db.vat_rates().load().await.unwrap();
        db.invoices()
            .create(&new_invoice("INV-1", date(2024, 1, 15)), &rates, &db.suppliers())
            .await
            .unwrap();

        let calendar = FilingCalendar::default();
        let dashboard = reports
            .vat_dashboard(&calendar, &FixedClock(date(2024, 3, 20)))
            .await
            .unwrap();

        assert_eq!(dashboard.outstanding.len(), 1);
        let jan_feb = &dashboard.outstanding[0];
        assert_eq!(jan_feb.period.label, "Jan-Feb 2024");
        assert_eq!(jan_feb.invoice_count, 1);
        assert_eq!(jan_feb.days_overdue, 5);

        let current = dashboard.current_period.unwrap();
        assert_eq!(current.period.label, "Mar-Apr 2024");
        assert!(!current.return_exists);
        assert_eq!(dashboard.next_deadline, Some(date(2024, 5, 15)));
        assert_eq!(dashboard.unsubmitted.count, 1);
        assert_eq!(dashboard.yearly.len(), 2);
    }

    #[tokio::test]
    async fn test_dashboard_period_covered_by_return_is_not_outstanding() {
        let reports = reports_with_sales().await;
        let db = reports.db.clone();
        let rates = db.vat_rates().load().await.unwrap();
        let a = db
            .invoices()
            .create(&new_invoice("INV-1", date(2024, 1, 15)), &rates, &db.suppliers())
            .await
            .unwrap();
        db.invoices()
            .create(&new_invoice("INV-2", date(2024, 2, 10)), &rates, &db.suppliers())
            .await
            .unwrap();

        // A monthly return inside Jan-Feb covers the bi-monthly period
        db.vat_returns()
            .create_draft(&NewVatReturn {
                return_period: "2024-02".to_string(),
                period_end: date(2024, 2, 29),
                invoice_ids: vec![a.id],
                notes: None,
                is_historical: false,
                created_by: None,
            })
            .await
            .unwrap();

        let dashboard = reports
            .vat_dashboard(&FilingCalendar::default(), &FixedClock(date(2024, 3, 20)))
            .await
            .unwrap();
        assert!(dashboard.outstanding.is_empty());
        assert_eq!(dashboard.recent_returns.len(), 1);
    }

    #[tokio::test]
    async fn test_ros_figures_use_sales_and_return_vat() {
        let reports = reports_with_sales().await;
        let db = reports.db.clone();
        let rates = db.vat_rates().load().await.unwrap();
        let invoice = db
            .invoices()
            .create(&new_invoice("INV-1", date(2025, 3, 5)), &rates, &db.suppliers())
            .await
            .unwrap();
        let vat_return = db
            .vat_returns()
            .create_draft(&NewVatReturn {
                return_period: "2025-03".to_string(),
                period_end: date(2025, 3, 31),
                invoice_ids: vec![invoice.id],
                notes: None,
                is_historical: false,
                created_by: None,
            })
            .await
            .unwrap();

        let ros = reports.ros_figures(&vat_return.id).await.unwrap();
        // Kitchen transfer VAT is left out of T1
        assert_eq!(ros.t1, money("230.00"));
        assert_eq!(ros.t2, money("37.20"));
        assert_eq!(ros.t3, money("192.80"));
        assert_eq!(ros.t4, Money::ZERO);
        assert_eq!(ros.e1, Money::ZERO);
    }

    #[tokio::test]
    async fn test_financial_alerts() {
        let reports = reports_with_sales().await;
        let db = reports.db.clone();
        save_reconciliation(&db, date(2025, 3, 10), "0", None).await;

        // Thursday, three days after the last count, no sales
        let alerts = reports
            .financial_alerts(date(2025, 3, 13), &AlertThresholds::default())
            .await
            .unwrap();

        let levels: Vec<AlertLevel> = alerts.iter().map(|a| a.level).collect();
        assert_eq!(levels, vec![AlertLevel::Warning, AlertLevel::Info]);
    }

    #[tokio::test]
    async fn test_reconciliation_csv_export() {
        let reports = reports_with_sales().await;
        let db = reports.db.clone();
        save_reconciliation(&db, date(2025, 3, 10), "12.50", Some("Till short, \"checked\"")).await;

        let range = DateRange::new(date(2025, 3, 1), date(2025, 3, 31)).unwrap();
        let csv = reports.reconciliation_csv(range, None).await.unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Date,Till,Total Cash"));
        assert!(lines[1].starts_with("2025-03-10,Till 1,50.00,"));
        assert!(lines[1].contains("\"Till short, \"\"checked\"\"\""));
        assert!(lines[1].contains("\"Milk, Co: €12.50\""));
        assert!(lines[1].ends_with(",alice"));
    }
}
