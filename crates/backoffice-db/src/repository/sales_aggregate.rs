//! # Sales Aggregate Repository
//!
//! Pre-aggregated daily sales, written by the import job and read by the
//! pre-aggregated [`AggregationSource`](crate::aggregation::AggregationSource).
//!
//! ## Storage
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sales_aggregate_daily                stock_transfer_daily              │
//! │  (sale_date, payment_type, vat_rate)  (transfer_date, department,       │
//! │                                        vat_rate)                        │
//! │  cash     STANDARD  net vat gross n   Kitchen  ZERO  net vat gross n    │
//! │  magcard  REDUCED   ...               Coffee   STANDARD ...             │
//! │  paperin  ZERO      ...                                                 │
//! │                                                                         │
//! │  sales_receipt_daily (sale_date)                                        │
//! │  distinct sales receipts of the day                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Amounts are kept at full precision, so re-summing stored rows gives
//! exactly what grouping the raw lines gives.

use std::collections::BTreeMap;

use backoffice_core::sales::{
    Department, Dimension, PaymentType, SalesAggregate, SalesAggregateRow,
};
use backoffice_core::DateRange;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::columns;
use crate::error::{DbError, DbResult};

/// Repository for the two pre-aggregated daily tables.
#[derive(Debug, Clone)]
pub struct SalesAggregateRepository {
    pool: SqlitePool,
}

impl SalesAggregateRepository {
    /// Creates a new SalesAggregateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SalesAggregateRepository { pool }
    }

    /// True if either table has a row in the range.
    pub async fn has_rows(&self, range: DateRange) -> DbResult<bool> {
        let exists: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM sales_aggregate_daily WHERE sale_date BETWEEN ?1 AND ?2
            ) OR EXISTS (
                SELECT 1 FROM stock_transfer_daily WHERE transfer_date BETWEEN ?1 AND ?2
            )
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists != 0)
    }

    /// Days in the range that already have rows in either table.
    pub async fn days_with_rows(&self, range: DateRange) -> DbResult<Vec<NaiveDate>> {
        let days: Vec<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT sale_date FROM sales_aggregate_daily WHERE sale_date BETWEEN ?1 AND ?2
            UNION
            SELECT transfer_date FROM stock_transfer_daily WHERE transfer_date BETWEEN ?1 AND ?2
            ORDER BY 1
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(days)
    }

    /// Every stored row in the range, from both tables in one query.
    pub async fn rows_in(&self, range: DateRange) -> DbResult<Vec<SalesAggregateRow>> {
        let rows = sqlx::query(
            r#"
            SELECT sale_date AS day, 'payment' AS kind, payment_type AS dimension,
                   vat_rate, net, vat, gross, transaction_count
            FROM sales_aggregate_daily
            WHERE sale_date BETWEEN ?1 AND ?2
            UNION ALL
            SELECT transfer_date, 'transfer', department,
                   vat_rate, net, vat, gross, transaction_count
            FROM stock_transfer_daily
            WHERE transfer_date BETWEEN ?1 AND ?2
            ORDER BY 1, 2, 3, 4
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_from_sql).collect()
    }

    /// Stored receipt counts by day.
    pub async fn receipts_in(&self, range: DateRange) -> DbResult<BTreeMap<NaiveDate, i64>> {
        let counts: Vec<(NaiveDate, i64)> = sqlx::query_as(
            "SELECT sale_date, receipt_count FROM sales_receipt_daily WHERE sale_date BETWEEN ?1 AND ?2",
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(counts.into_iter().collect())
    }

    /// Rows and receipt counts of the range.
    pub async fn aggregate_in(&self, range: DateRange) -> DbResult<SalesAggregate> {
        Ok(SalesAggregate {
            rows: self.rows_in(range).await?,
            receipts_by_day: self.receipts_in(range).await?,
        })
    }

    /// Replaces everything stored for `day` with the day's part of
    /// `aggregate`, in one transaction.
    ///
    /// Groups that vanished from the source are deleted; the rest are
    /// upserted by their unique key, so re-running a day is idempotent.
    ///
    /// ## Returns
    /// Number of aggregate rows written.
    pub async fn replace_day(&self, day: NaiveDate, aggregate: &SalesAggregate) -> DbResult<usize> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sales_aggregate_daily WHERE sale_date = ?1")
            .bind(day)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM stock_transfer_daily WHERE transfer_date = ?1")
            .bind(day)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sales_receipt_daily WHERE sale_date = ?1")
            .bind(day)
            .execute(&mut *tx)
            .await?;

        let receipts = aggregate.receipts_by_day.get(&day).copied().unwrap_or(0);
        if receipts > 0 {
            sqlx::query(
                "INSERT INTO sales_receipt_daily (sale_date, receipt_count, imported_at) VALUES (?1, ?2, ?3)",
            )
            .bind(day)
            .bind(receipts)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let mut written = 0;
        for row in aggregate.rows.iter().filter(|r| r.date == day) {
            let sql = match &row.dimension {
                Dimension::Payment(_) => {
                    r#"
                    INSERT INTO sales_aggregate_daily
                        (sale_date, payment_type, vat_rate, net, vat, gross, transaction_count, imported_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT (sale_date, payment_type, vat_rate) DO UPDATE SET
                        net = excluded.net,
                        vat = excluded.vat,
                        gross = excluded.gross,
                        transaction_count = excluded.transaction_count,
                        imported_at = excluded.imported_at
                    "#
                }
                Dimension::Transfer(_) => {
                    r#"
                    INSERT INTO stock_transfer_daily
                        (transfer_date, department, vat_rate, net, vat, gross, transaction_count, imported_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT (transfer_date, department, vat_rate) DO UPDATE SET
                        net = excluded.net,
                        vat = excluded.vat,
                        gross = excluded.gross,
                        transaction_count = excluded.transaction_count,
                        imported_at = excluded.imported_at
                    "#
                }
            };

            sqlx::query(sql)
                .bind(row.date)
                .bind(dimension_key(&row.dimension))
                .bind(row.vat_rate)
                .bind(columns::text(row.net))
                .bind(columns::text(row.vat))
                .bind(columns::text(row.gross))
                .bind(row.transaction_count)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            written += 1;
        }

        tx.commit().await?;

        debug!(day = %day, rows = written, receipts, "Replaced pre-aggregated sales day");
        Ok(written)
    }
}

fn dimension_key(dimension: &Dimension) -> &str {
    match dimension {
        Dimension::Payment(payment) => payment.as_str(),
        Dimension::Transfer(department) => department.as_str(),
    }
}

fn row_from_sql(row: &SqliteRow) -> DbResult<SalesAggregateRow> {
    let kind: String = row.try_get("kind")?;
    let key: String = row.try_get("dimension")?;

    let dimension = if kind == "transfer" {
        let department =
            Department::from_customer(&key).ok_or_else(|| DbError::decode("department", &key))?;
        Dimension::Transfer(department)
    } else {
        Dimension::Payment(PaymentType::from_pos(&key))
    };

    Ok(SalesAggregateRow {
        date: row.try_get("day")?,
        dimension,
        vat_rate: row.try_get("vat_rate")?,
        net: columns::money(row, "net")?,
        vat: columns::money(row, "vat")?,
        gross: columns::money(row, "gross")?,
        transaction_count: row.try_get("transaction_count")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use backoffice_core::{Money, VatRateCode};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn row(day: NaiveDate, dimension: Dimension, code: VatRateCode, net: &str, vat: &str) -> SalesAggregateRow {
        SalesAggregateRow {
            date: day,
            dimension,
            vat_rate: code,
            net: money(net),
            vat: money(vat),
            gross: money(net) + money(vat),
            transaction_count: 2,
        }
    }

    fn aggregate(rows: Vec<SalesAggregateRow>) -> SalesAggregate {
        SalesAggregate {
            rows,
            receipts_by_day: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_replace_day_and_read_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales_aggregates();
        let day = date(2025, 3, 10);

        let rows = vec![
            row(day, Dimension::Payment(PaymentType::Cash), VatRateCode::Standard, "10.0000", "2.3000"),
            row(day, Dimension::Transfer(Department::Kitchen), VatRateCode::Zero, "4.5", "0"),
        ];
        assert_eq!(repo.replace_day(day, &aggregate(rows)).await.unwrap(), 2);

        let stored = repo.rows_in(DateRange::day(day)).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|r| r.dimension == Dimension::Transfer(Department::Kitchen)));
        let cash = stored
            .iter()
            .find(|r| r.dimension == Dimension::Payment(PaymentType::Cash))
            .unwrap();
        assert_eq!(cash.vat, money("2.3"));
        assert!(cash.is_consistent());
    }

    #[tokio::test]
    async fn test_replace_day_drops_vanished_groups() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales_aggregates();
        let day = date(2025, 3, 10);

        let first = vec![
            row(day, Dimension::Payment(PaymentType::Cash), VatRateCode::Standard, "10", "2.3"),
            row(day, Dimension::Payment(PaymentType::Magcard), VatRateCode::Standard, "5", "1.15"),
        ];
        repo.replace_day(day, &aggregate(first)).await.unwrap();

        let second = vec![row(day, Dimension::Payment(PaymentType::Cash), VatRateCode::Standard, "12", "2.76")];
        repo.replace_day(day, &aggregate(second)).await.unwrap();

        let stored = repo.rows_in(DateRange::day(day)).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].net, money("12"));
    }

    #[tokio::test]
    async fn test_has_rows_checks_both_tables() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales_aggregates();
        let day = date(2025, 3, 10);
        let range = DateRange::new(date(2025, 3, 1), date(2025, 3, 31)).unwrap();

        assert!(!repo.has_rows(range).await.unwrap());

        let rows = vec![row(day, Dimension::Transfer(Department::Coffee), VatRateCode::Zero, "3", "0")];
        repo.replace_day(day, &aggregate(rows)).await.unwrap();

        assert!(repo.has_rows(range).await.unwrap());
        assert_eq!(repo.days_with_rows(range).await.unwrap(), vec![day]);
        assert!(!repo
            .has_rows(DateRange::day(date(2025, 4, 1)))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_receipt_counts_are_replaced_with_the_day() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales_aggregates();
        let day = date(2025, 3, 10);
        let cash = || row(day, Dimension::Payment(PaymentType::Cash), VatRateCode::Standard, "10", "2.3");

        let mut first = aggregate(vec![cash()]);
        first.receipts_by_day.insert(day, 3);
        first.receipts_by_day.insert(date(2025, 3, 11), 9);
        repo.replace_day(day, &first).await.unwrap();

        let stored = repo.aggregate_in(DateRange::day(day)).await.unwrap();
        assert_eq!(stored.receipt_count(), 3);
        assert_eq!(stored.rows.len(), 1);
        assert!(repo
            .receipts_in(DateRange::day(date(2025, 3, 11)))
            .await
            .unwrap()
            .is_empty());

        let transfers_only = aggregate(vec![row(
            day,
            Dimension::Transfer(Department::Kitchen),
            VatRateCode::Zero,
            "4",
            "0",
        )]);
        repo.replace_day(day, &transfers_only).await.unwrap();
        assert!(repo.receipts_in(DateRange::day(day)).await.unwrap().is_empty());
    }
}
