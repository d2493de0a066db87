//! # POS Transaction Source
//!
//! Read-only access to the till software's database.
//!
//! ## Line Extraction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One query, two shapes                                │
//! │                                                                         │
//! │  RECEIPTS ─┬─ TICKETS ─┬─ TICKETLINES ─ TAXES                          │
//! │            │           └─ CUSTOMERS (optional)                         │
//! │            └─ PAYMENTS                                                 │
//! │                                                                         │
//! │  Customer sales (customer not Kitchen/Coffee)                          │
//! │    → one row per ticket line per payment of the receipt               │
//! │                                                                         │
//! │  Internal transfers (customer Kitchen/Coffee)                          │
//! │    → one row per ticket line, payments ignored                         │
//! │                                                                         │
//! │  Both halves are a single UNION ALL statement, so a range is read      │
//! │  from one snapshot.                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Numbers are stored as REAL by the POS and read as TEXT, then parsed into
//! exact decimals before any arithmetic.

use async_trait::async_trait;
use backoffice_core::reconciliation::PosTillTotals;
use backoffice_core::sales::TransactionLine;
use backoffice_core::{CoreError, CoreResult, DateRange, Money, TRANSFER_DEPARTMENTS};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::columns::parse_decimal;

const SOURCE_NAME: &str = "pos";

// =============================================================================
// Types
// =============================================================================

/// A till known to the POS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Till {
    /// Position in the alphabetical till list, starting at 1.
    pub id: i64,
    pub name: String,
}

/// A closed cash session and what the POS took in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TillSession {
    pub closed_cash_id: String,
    pub totals: PosTillTotals,
}

// =============================================================================
// Source Trait
// =============================================================================

/// Anything that can supply POS transaction data.
///
/// Failures are `CoreError::DataSource`; an empty range is `Ok(vec![])`.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Every transaction line dated within the range.
    async fn lines(&self, range: DateRange) -> CoreResult<Vec<TransactionLine>>;

    /// The session a till closed on `date`, if it closed one.
    async fn till_session(&self, till_name: &str, date: NaiveDate) -> CoreResult<Option<TillSession>>;

    /// All tills that have ever closed a session.
    async fn tills(&self) -> CoreResult<Vec<Till>>;
}

// =============================================================================
// SQLite Implementation
// =============================================================================

/// Reads the POS SQLite database.
#[derive(Debug, Clone)]
pub struct SqlitePosSource {
    pool: SqlitePool,
}

impl SqlitePosSource {
    /// Wraps a pool opened with [`DbConfig::pos`](crate::DbConfig::pos).
    pub fn new(pool: SqlitePool) -> Self {
        SqlitePosSource { pool }
    }
}

fn source_error(err: sqlx::Error) -> CoreError {
    CoreError::data_source(SOURCE_NAME, err.to_string())
}

fn decimal_field(row: &SqliteRow, column: &str) -> CoreResult<Decimal> {
    let raw: String = row.try_get(column).map_err(source_error)?;
    parse_decimal(&raw).ok_or_else(|| {
        CoreError::data_source(SOURCE_NAME, format!("column {} is not numeric: '{}'", column, raw))
    })
}

fn line_from_row(row: &SqliteRow) -> CoreResult<TransactionLine> {
    let day: String = row.try_get("day").map_err(source_error)?;
    let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
        CoreError::data_source(SOURCE_NAME, format!("bad receipt date '{}': {}", day, e))
    })?;

    Ok(TransactionLine {
        ticket_id: row.try_get("ticket_id").map_err(source_error)?,
        receipt_id: row.try_get("receipt_id").map_err(source_error)?,
        date,
        price: decimal_field(row, "price")?,
        quantity: decimal_field(row, "units")?,
        vat_rate: decimal_field(row, "rate")?,
        payment_type: row.try_get("payment").map_err(source_error)?,
        customer_name: row.try_get("customer_name").map_err(source_error)?,
    })
}

#[async_trait]
impl TransactionSource for SqlitePosSource {
    async fn lines(&self, range: DateRange) -> CoreResult<Vec<TransactionLine>> {
        let rows = sqlx::query(
            r#"
            SELECT CAST(T.TICKETID AS TEXT) AS ticket_id,
                   R.ID AS receipt_id,
                   date(R.DATENEW) AS day,
                   CAST(L.PRICE AS TEXT) AS price,
                   CAST(L.UNITS AS TEXT) AS units,
                   CAST(X.RATE AS TEXT) AS rate,
                   P.PAYMENT AS payment,
                   C.NAME AS customer_name
            FROM RECEIPTS R
            JOIN TICKETS T ON T.ID = R.ID
            JOIN TICKETLINES L ON L.TICKET = T.ID
            JOIN TAXES X ON X.ID = L.TAXID
            JOIN PAYMENTS P ON P.RECEIPT = R.ID
            LEFT JOIN CUSTOMERS C ON C.ID = T.CUSTOMER
            WHERE date(R.DATENEW) BETWEEN ?1 AND ?2
              AND (C.NAME IS NULL OR C.NAME NOT IN (?3, ?4))
            UNION ALL
            SELECT CAST(T.TICKETID AS TEXT),
                   R.ID,
                   date(R.DATENEW),
                   CAST(L.PRICE AS TEXT),
                   CAST(L.UNITS AS TEXT),
                   CAST(X.RATE AS TEXT),
                   'transfer',
                   C.NAME
            FROM RECEIPTS R
            JOIN TICKETS T ON T.ID = R.ID
            JOIN TICKETLINES L ON L.TICKET = T.ID
            JOIN TAXES X ON X.ID = L.TAXID
            JOIN CUSTOMERS C ON C.ID = T.CUSTOMER
            WHERE date(R.DATENEW) BETWEEN ?1 AND ?2
              AND C.NAME IN (?3, ?4)
            "#,
        )
        .bind(range.start.format("%Y-%m-%d").to_string())
        .bind(range.end.format("%Y-%m-%d").to_string())
        .bind(TRANSFER_DEPARTMENTS[0])
        .bind(TRANSFER_DEPARTMENTS[1])
        .fetch_all(&self.pool)
        .await
        .map_err(source_error)?;

        let lines = rows.iter().map(line_from_row).collect::<CoreResult<Vec<_>>>()?;

        debug!(
            start = %range.start,
            end = %range.end,
            lines = lines.len(),
            "Read POS transaction lines"
        );
        Ok(lines)
    }

    async fn till_session(&self, till_name: &str, date: NaiveDate) -> CoreResult<Option<TillSession>> {
        let money: Option<String> = sqlx::query_scalar(
            r#"
            SELECT MONEY FROM CLOSEDCASH
            WHERE HOST = ?1 AND date(DATEEND) = ?2
            ORDER BY DATEEND
            LIMIT 1
            "#,
        )
        .bind(till_name)
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(source_error)?;

        let Some(closed_cash_id) = money else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT P.PAYMENT AS payment, CAST(P.TOTAL AS TEXT) AS total
            FROM PAYMENTS P
            JOIN RECEIPTS R ON R.ID = P.RECEIPT
            WHERE R.MONEY = ?1
            "#,
        )
        .bind(&closed_cash_id)
        .fetch_all(&self.pool)
        .await
        .map_err(source_error)?;

        let mut sums = Vec::with_capacity(rows.len());
        for row in &rows {
            let payment: String = row.try_get("payment").map_err(source_error)?;
            sums.push((payment, Money::new(decimal_field(row, "total")?)));
        }
        let totals = PosTillTotals::from_payment_sums(sums.iter().map(|(p, m)| (p.as_str(), *m)));

        Ok(Some(TillSession {
            closed_cash_id,
            totals,
        }))
    }

    async fn tills(&self) -> CoreResult<Vec<Till>> {
        let hosts: Vec<String> = sqlx::query_scalar("SELECT DISTINCT HOST FROM CLOSEDCASH ORDER BY HOST")
            .fetch_all(&self.pool)
            .await
            .map_err(source_error)?;

        Ok(hosts
            .into_iter()
            .enumerate()
            .map(|(index, name)| Till {
                id: index as i64 + 1,
                name,
            })
            .collect())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pos_fixture, PosSale};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_lines_split_sales_and_transfers() {
        let pos = pos_fixture().await;
        PosSale::new("r1", date(2025, 3, 10))
            .line("10.00", "1", "tax-std")
            .payment("cash", "12.30")
            .insert(&pos)
            .await;
        PosSale::new("r2", date(2025, 3, 10))
            .customer("cust-kitchen")
            .line("4.50", "2", "tax-zero")
            .payment("cash", "9.00")
            .insert(&pos)
            .await;

        let source = SqlitePosSource::new(pos);
        let lines = source.lines(DateRange::day(date(2025, 3, 10))).await.unwrap();

        assert_eq!(lines.len(), 2);
        let sale = lines.iter().find(|l| l.receipt_id == "r1").unwrap();
        assert_eq!(sale.payment_type, "cash");
        assert_eq!(sale.vat_rate, "0.23".parse::<Decimal>().unwrap());

        let transfer = lines.iter().find(|l| l.receipt_id == "r2").unwrap();
        assert_eq!(transfer.customer_name.as_deref(), Some("Kitchen"));
        assert_eq!(transfer.net(), money("9.00"));
    }

    #[tokio::test]
    async fn test_empty_range_is_not_an_error() {
        let pos = pos_fixture().await;
        let source = SqlitePosSource::new(pos);
        let lines = source.lines(DateRange::day(date(2025, 1, 1))).await.unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_broken_source_is_data_source_error() {
        // A database without the POS tables
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let source = SqlitePosSource::new(pool);

        let err = source.lines(DateRange::day(date(2025, 1, 1))).await.unwrap_err();
        assert!(matches!(err, CoreError::DataSource { .. }));
    }

    #[tokio::test]
    async fn test_till_session_totals() {
        let pos = pos_fixture().await;
        PosSale::new("r1", date(2025, 3, 10))
            .line("10.00", "1", "tax-std")
            .payment("cash", "12.30")
            .insert(&pos)
            .await;
        PosSale::new("r2", date(2025, 3, 10))
            .line("20.00", "1", "tax-std")
            .payment("magcard", "24.60")
            .insert(&pos)
            .await;

        let source = SqlitePosSource::new(pos);
        let session = source
            .till_session("Till 1", date(2025, 3, 10))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.totals.cash, money("12.30"));
        assert_eq!(session.totals.card, money("24.60"));
        assert!(source
            .till_session("Till 1", date(2025, 3, 11))
            .await
            .unwrap()
            .is_none());

        let tills = source.tills().await.unwrap();
        assert_eq!(tills, vec![Till { id: 1, name: "Till 1".to_string() }]);
    }
}
