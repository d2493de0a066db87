//! # Sales Aggregation
//!
//! Turns POS activity into a [`SalesAggregate`], either from the daily
//! pre-aggregated tables or by grouping raw POS lines on demand.
//!
//! ## Strategy Selection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  summary(range)                                                         │
//! │     │                                                                   │
//! │     ├── any pre-aggregated row in range? ──► PreAggregatedSource        │
//! │     │                                         (sales_aggregate_daily,   │
//! │     │                                          stock_transfer_daily,    │
//! │     │                                          sales_receipt_daily)     │
//! │     └── otherwise ─────────────────────────► RealTimeSource             │
//! │                                               (POS lines, grouped now)  │
//! │                                                                         │
//! │  Both produce the same rows for the same data; the import job writes   │
//! │  exactly what RealTimeSource computes.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use backoffice_core::sales::{SalesAggregate, SalesSummary};
use backoffice_core::{DateRange, VatRateTable};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::DbResult;
use crate::pool::Database;
use crate::pos::TransactionSource;
use crate::repository::sales_aggregate::SalesAggregateRepository;

/// Which strategy produced a set of rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    PreAggregated,
    RealTime,
}

impl AggregationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMode::PreAggregated => "pre_aggregated",
            AggregationMode::RealTime => "real_time",
        }
    }
}

// =============================================================================
// Strategies
// =============================================================================

/// A way of producing the sales aggregate for a date range.
#[async_trait]
pub trait AggregationSource: Send + Sync {
    fn mode(&self) -> AggregationMode;

    async fn aggregate(&self, range: DateRange) -> DbResult<SalesAggregate>;
}

/// Reads the rows the import job stored.
#[derive(Debug, Clone)]
pub struct PreAggregatedSource {
    repo: SalesAggregateRepository,
}

impl PreAggregatedSource {
    pub fn new(repo: SalesAggregateRepository) -> Self {
        PreAggregatedSource { repo }
    }
}

#[async_trait]
impl AggregationSource for PreAggregatedSource {
    fn mode(&self) -> AggregationMode {
        AggregationMode::PreAggregated
    }

    async fn aggregate(&self, range: DateRange) -> DbResult<SalesAggregate> {
        self.repo.aggregate_in(range).await
    }
}

/// Groups raw POS lines on demand.
pub struct RealTimeSource {
    source: Arc<dyn TransactionSource>,
    rates: VatRateTable,
}

impl RealTimeSource {
    pub fn new(source: Arc<dyn TransactionSource>, rates: VatRateTable) -> Self {
        RealTimeSource { source, rates }
    }
}

#[async_trait]
impl AggregationSource for RealTimeSource {
    fn mode(&self) -> AggregationMode {
        AggregationMode::RealTime
    }

    async fn aggregate(&self, range: DateRange) -> DbResult<SalesAggregate> {
        let lines = self.source.lines(range).await?;
        Ok(SalesAggregate::from_lines(&lines, &self.rates)?)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Outcome of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub days_imported: usize,
    pub days_skipped: usize,
    pub rows_written: usize,
    pub lines_read: usize,
}

/// Sales aggregation over the back office database and the POS.
#[derive(Clone)]
pub struct SalesEngine {
    db: Database,
    pos: Arc<dyn TransactionSource>,
}

impl SalesEngine {
    pub fn new(db: Database, pos: Arc<dyn TransactionSource>) -> Self {
        SalesEngine { db, pos }
    }

    /// Picks the strategy for a range: stored rows win when any exist.
    pub async fn source_for(&self, range: DateRange) -> DbResult<Box<dyn AggregationSource>> {
        let repo = self.db.sales_aggregates();
        let source: Box<dyn AggregationSource> = if repo.has_rows(range).await? {
            Box::new(PreAggregatedSource::new(repo))
        } else {
            let rates = self.db.vat_rates().load().await?;
            Box::new(RealTimeSource::new(Arc::clone(&self.pos), rates))
        };

        debug!(
            start = %range.start,
            end = %range.end,
            mode = source.mode().as_str(),
            "Selected aggregation source"
        );
        Ok(source)
    }

    /// Aggregate for the range from whichever strategy applies.
    pub async fn aggregate(&self, range: DateRange) -> DbResult<(AggregationMode, SalesAggregate)> {
        let source = self.source_for(range).await?;
        let aggregate = source.aggregate(range).await?;
        Ok((source.mode(), aggregate))
    }

    /// Period summary for the range.
    pub async fn summary(&self, range: DateRange) -> DbResult<SalesSummary> {
        let (_, aggregate) = self.aggregate(range).await?;
        Ok(SalesSummary::from_aggregate(&aggregate))
    }

    /// Summary computed from POS lines regardless of stored rows.
    pub async fn real_time_summary(&self, range: DateRange) -> DbResult<SalesSummary> {
        let rates = self.db.vat_rates().load().await?;
        let aggregate = RealTimeSource::new(Arc::clone(&self.pos), rates)
            .aggregate(range)
            .await?;
        Ok(SalesSummary::from_aggregate(&aggregate))
    }

    /// Writes the pre-aggregated rows for every day of the range.
    ///
    /// Days that already have rows are skipped unless `force` is set. Each
    /// day is replaced in its own transaction, so re-running is safe.
    pub async fn import(&self, range: DateRange, force: bool) -> DbResult<ImportReport> {
        let repo = self.db.sales_aggregates();
        let rates = self.db.vat_rates().load().await?;
        let existing = repo.days_with_rows(range).await?;
        let mut report = ImportReport::default();

        for day in range.iter_days() {
            if !force && existing.contains(&day) {
                debug!(day = %day, "Day already aggregated, skipping");
                report.days_skipped += 1;
                continue;
            }

            let written = self.import_day(&repo, &rates, day, &mut report).await?;
            report.days_imported += 1;
            report.rows_written += written;
        }

        info!(
            start = %range.start,
            end = %range.end,
            force,
            imported = report.days_imported,
            skipped = report.days_skipped,
            rows = report.rows_written,
            "Sales import finished"
        );
        Ok(report)
    }

    async fn import_day(
        &self,
        repo: &SalesAggregateRepository,
        rates: &VatRateTable,
        day: NaiveDate,
        report: &mut ImportReport,
    ) -> DbResult<usize> {
        let lines = self.pos.lines(DateRange::day(day)).await?;
        report.lines_read += lines.len();
        let aggregate = SalesAggregate::from_lines(&lines, rates)?;
        repo.replace_day(day, &aggregate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pos::SqlitePosSource;
    use crate::test_support::{pos_fixture, seeded_db, PosSale};
    use backoffice_core::sales::{Department, PaymentType};
    use backoffice_core::{CoreError, Money, VatRateCode};
    use sqlx::SqlitePool;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    async fn sample_pos() -> SqlitePool {
        let pos = pos_fixture().await;
        PosSale::new("r1", date(2025, 3, 10))
            .line("1.2345", "3", "tax-std")
            .line("2.10", "1", "tax-red")
            .payment("cash", "6.94")
            .insert(&pos)
            .await;
        PosSale::new("r2", date(2025, 3, 10))
            .line("10.00", "1", "tax-std")
            .payment("magcard", "5.00")
            .payment("cash", "7.30")
            .insert(&pos)
            .await;
        PosSale::new("r3", date(2025, 3, 11))
            .line("20.00", "1", "tax-zero")
            .payment("paperin", "20.00")
            .insert(&pos)
            .await;
        PosSale::new("r4", date(2025, 3, 11))
            .customer("cust-coffee")
            .line("3.00", "4", "tax-zero")
            .insert(&pos)
            .await;
        pos
    }

    async fn engine() -> SalesEngine {
        let db = seeded_db().await;
        let pos = SqlitePosSource::new(sample_pos().await);
        SalesEngine::new(db, Arc::new(pos))
    }

    fn march() -> DateRange {
        DateRange::new(date(2025, 3, 1), date(2025, 3, 31)).unwrap()
    }

    #[tokio::test]
    async fn test_real_time_used_when_nothing_imported() {
        let engine = engine().await;
        let (mode, aggregate) = engine.aggregate(march()).await.unwrap();
        assert_eq!(mode, AggregationMode::RealTime);
        assert!(!aggregate.is_empty());
    }

    #[tokio::test]
    async fn test_modes_agree_exactly() {
        let engine = engine().await;
        let live = engine.real_time_summary(march()).await.unwrap();

        let report = engine.import(march(), false).await.unwrap();
        assert_eq!(report.days_imported, 31);
        assert!(report.rows_written > 0);

        let (mode, _) = engine.aggregate(march()).await.unwrap();
        assert_eq!(mode, AggregationMode::PreAggregated);
        let stored = engine.summary(march()).await.unwrap();

        assert_eq!(stored, live);
    }

    #[tokio::test]
    async fn test_summary_figures() {
        let engine = engine().await;
        let summary = engine.summary(march()).await.unwrap();

        // Split tender counts the line once per payment row
        assert_eq!(summary.payment_net(&PaymentType::Cash), money("15.8035"));
        assert_eq!(summary.payment_net(&PaymentType::Magcard), money("10.00"));
        assert_eq!(summary.voucher_gross, money("20.00"));
        assert_eq!(summary.total_revenue, summary.total_net - money("20.00"));
        assert_eq!(summary.total_transfers, money("12.00"));
        assert_eq!(
            summary.transfers_by_department[&Department::Coffee].net,
            money("12.00")
        );
        assert_eq!(summary.by_rate[&VatRateCode::Zero].net, Money::ZERO);
        // r1, r2 and r3; the coffee transfer is not a sale
        assert_eq!(summary.transaction_count, 3);
    }

    #[tokio::test]
    async fn test_split_receipt_counts_once_in_both_modes() {
        let db = seeded_db().await;
        let pos = pos_fixture().await;
        PosSale::new("r1", date(2025, 3, 10))
            .line("10.00", "1", "tax-std")
            .line("4.00", "1", "tax-red")
            .payment("cash", "8.00")
            .payment("magcard", "8.84")
            .insert(&pos)
            .await;
        let engine = SalesEngine::new(db, Arc::new(SqlitePosSource::new(pos)));
        let day = DateRange::day(date(2025, 3, 10));

        let (_, aggregate) = engine.aggregate(day).await.unwrap();
        assert_eq!(aggregate.rows.len(), 4);

        let live = engine.real_time_summary(day).await.unwrap();
        assert_eq!(live.transaction_count, 1);
        assert_eq!(live.avg_transaction, live.total_revenue);

        engine.import(day, false).await.unwrap();
        let (mode, _) = engine.aggregate(day).await.unwrap();
        assert_eq!(mode, AggregationMode::PreAggregated);
        assert_eq!(engine.summary(day).await.unwrap(), live);
    }

    #[tokio::test]
    async fn test_import_skips_existing_days_unless_forced() {
        let engine = engine().await;
        let day = DateRange::day(date(2025, 3, 10));

        engine.import(day, false).await.unwrap();
        let again = engine.import(day, false).await.unwrap();
        assert_eq!(again.days_skipped, 1);
        assert_eq!(again.days_imported, 0);

        let forced = engine.import(day, true).await.unwrap();
        assert_eq!(forced.days_imported, 1);
        assert_eq!(forced.lines_read, 4);
    }

    #[tokio::test]
    async fn test_unknown_pos_rate_fails_import() {
        let db = seeded_db().await;
        let pos = sample_pos().await;
        sqlx::query("INSERT INTO TAXES (ID, NAME, RATE) VALUES ('tax-odd', 'Odd', 0.17)")
            .execute(&pos)
            .await
            .unwrap();
        PosSale::new("r9", date(2025, 3, 12))
            .line("5.00", "1", "tax-odd")
            .payment("cash", "5.85")
            .insert(&pos)
            .await;

        let engine = SalesEngine::new(db, Arc::new(SqlitePosSource::new(pos)));
        let err = engine
            .import(DateRange::day(date(2025, 3, 12)), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_core(),
            Some(CoreError::UnrecognizedRate { .. })
        ));
    }
}
