//! # VAT Rate Repository
//!
//! Persistence for the time-versioned rate table.
//!
//! Ranges are never edited in place. A rate change closes the open range
//! and inserts a new one, so totals computed in the past keep resolving to
//! the rate that applied on their own dates.

use backoffice_core::vat_rate::{VatRate, VatRateCode, VatRateTable};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::columns;
use crate::error::DbResult;

/// Repository for VAT rate ranges.
#[derive(Debug, Clone)]
pub struct VatRateRepository {
    pool: SqlitePool,
}

impl VatRateRepository {
    /// Creates a new VatRateRepository.
    pub fn new(pool: SqlitePool) -> Self {
        VatRateRepository { pool }
    }

    /// Loads every stored range into a validated table.
    pub async fn load(&self) -> DbResult<VatRateTable> {
        load_table(&self.pool).await
    }

    /// Inserts the four default rates if the table is empty.
    ///
    /// ## Returns
    /// Number of ranges inserted (0 when already seeded).
    pub async fn seed_defaults(&self) -> DbResult<usize> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vat_rates")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            debug!(existing, "VAT rates already seeded");
            return Ok(0);
        }

        let defaults = VatRateTable::irish_defaults();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for range in defaults.ranges() {
            insert_row(&mut tx, range, now).await?;
        }
        tx.commit().await?;

        info!(ranges = defaults.ranges().len(), "Seeded default VAT rates");
        Ok(defaults.ranges().len())
    }

    /// Records a rate change effective from `effective_from`.
    ///
    /// ## What This Does
    /// 1. Loads the table and applies the change in memory, which rejects
    ///    a start date that doesn't follow the open range
    /// 2. Closes the open range of `code` on the day before
    /// 3. Inserts the new open-ended range
    ///
    /// All three run in one transaction.
    pub async fn insert_range(
        &self,
        code: VatRateCode,
        name: &str,
        rate: Decimal,
        effective_from: NaiveDate,
    ) -> DbResult<VatRateTable> {
        let mut tx = self.pool.begin().await?;
        let mut table = load_table(&mut *tx).await?;
        let closed = table.insert_range(code, name, rate, effective_from)?;
        let now = Utc::now();

        if let Some(closed) = &closed {
            sqlx::query(
                r#"
                UPDATE vat_rates SET effective_to = ?1, updated_at = ?2
                WHERE code = ?3 AND effective_from = ?4
                "#,
            )
            .bind(closed.effective_to)
            .bind(now)
            .bind(closed.code)
            .bind(closed.effective_from)
            .execute(&mut *tx)
            .await?;
        }

        let new_range = table.range_for(code, effective_from)?.clone();
        insert_row(&mut tx, &new_range, now).await?;
        tx.commit().await?;

        info!(
            code = %code,
            rate = %rate,
            effective_from = %effective_from,
            "Inserted VAT rate range"
        );
        Ok(table)
    }
}

async fn load_table(conn: impl Executor<'_, Database = Sqlite>) -> DbResult<VatRateTable> {
    let rows = sqlx::query(
        r#"
        SELECT code, name, rate, effective_from, effective_to
        FROM vat_rates
        ORDER BY code, effective_from
        "#,
    )
    .fetch_all(conn)
    .await?;

    let ranges = rows
        .iter()
        .map(range_from_row)
        .collect::<DbResult<Vec<_>>>()?;

    debug!(ranges = ranges.len(), "Loaded VAT rate table");
    Ok(VatRateTable::new(ranges)?)
}

async fn insert_row(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    range: &VatRate,
    now: chrono::DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO vat_rates (code, name, rate, effective_from, effective_to, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        "#,
    )
    .bind(range.code)
    .bind(&range.name)
    .bind(range.rate.to_string())
    .bind(range.effective_from)
    .bind(range.effective_to)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn range_from_row(row: &SqliteRow) -> DbResult<VatRate> {
    Ok(VatRate {
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        rate: columns::decimal(row, "rate")?,
        effective_from: row.try_get("effective_from")?,
        effective_to: row.try_get("effective_to")?,
    })
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use backoffice_core::vat_rate::{VatRateCode, VatRateTable};
    use backoffice_core::CoreError;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.vat_rates();

        assert_eq!(repo.seed_defaults().await.unwrap(), 4);
        assert_eq!(repo.seed_defaults().await.unwrap(), 0);

        let table = repo.load().await.unwrap();
        assert_eq!(table.ranges().len(), 4);
        assert_eq!(
            table.rate_for(VatRateCode::Reduced, date(2024, 6, 1)).unwrap(),
            "0.135".parse::<Decimal>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_insert_range_closes_previous() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.vat_rates();
        repo.seed_defaults().await.unwrap();

        repo.insert_range(
            VatRateCode::SecondReduced,
            "Second Reduced Rate",
            "0.135".parse().unwrap(),
            date(2025, 1, 1),
        )
        .await
        .unwrap();

        let table = repo.load().await.unwrap();
        assert_eq!(table.ranges().len(), 5);
        assert_eq!(
            table.rate_for(VatRateCode::SecondReduced, date(2024, 12, 31)).unwrap(),
            "0.09".parse::<Decimal>().unwrap()
        );
        assert_eq!(
            table.rate_for(VatRateCode::SecondReduced, date(2025, 1, 1)).unwrap(),
            "0.135".parse::<Decimal>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_concurrent_rate_changes_never_overlap() {
        let path = std::env::temp_dir().join(format!("backoffice-rates-{}.db", uuid::Uuid::new_v4()));
        let db = Database::new(DbConfig::new(&path).max_connections(2))
            .await
            .unwrap();
        let repo = db.vat_rates();
        repo.seed_defaults().await.unwrap();

        let (a, b) = tokio::join!(
            repo.insert_range(VatRateCode::Standard, "Standard Rate", "0.21".parse().unwrap(), date(2025, 1, 1)),
            repo.insert_range(VatRateCode::Standard, "Standard Rate", "0.22".parse().unwrap(), date(2026, 1, 1)),
        );
        assert!(a.is_ok() || b.is_ok());

        // Loading re-validates that no two STANDARD ranges overlap
        let table = repo.load().await.unwrap();
        let open = table
            .ranges()
            .iter()
            .filter(|r| r.code == VatRateCode::Standard && r.effective_to.is_none())
            .count();
        assert_eq!(open, 1);

        db.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_rejected_change_writes_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.vat_rates();
        repo.seed_defaults().await.unwrap();

        let err = repo
            .insert_range(VatRateCode::Standard, "Standard Rate", "0.21".parse().unwrap(), date(2010, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(err.as_core(), Some(CoreError::Validation(_))));
        assert_eq!(repo.load().await.unwrap(), VatRateTable::irish_defaults());
    }

    #[tokio::test]
    async fn test_lookup_before_seed_fails() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.vat_rates().seed_defaults().await.unwrap();
        let table = db.vat_rates().load().await.unwrap();

        let err = table
            .rate_for(VatRateCode::Standard, date(2010, 12, 31))
            .unwrap_err();
        assert!(matches!(err, CoreError::NoApplicableRate { .. }));
    }
}
