//! # VAT Return Repository
//!
//! Draft, finalize and file VAT returns over a fixed set of invoices.
//!
//! ## Return Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      VAT Return Lifecycle                               │
//! │                                                                         │
//! │  1. DRAFT                                                              │
//! │     └── create_draft() in ONE transaction:                             │
//! │         ├── INSERT the return; a taken label is DuplicatePeriod        │
//! │         ├── UPDATE invoices SET vat_return_id = ?                      │
//! │         │   WHERE id IN (...) AND vat_return_id IS NULL                │
//! │         ├── claimed != requested → roll everything back                │
//! │         └── sum the owned invoices into the totals                     │
//! │     └── add_invoices() / remove_invoice() recalculate after each call  │
//! │     └── destroy() unassigns every invoice and deletes the return       │
//! │                                                                         │
//! │  2. FINALIZED                                                          │
//! │     └── finalize(): needs ≥ 1 invoice and consistent totals;           │
//! │         totals are locked as last calculated                           │
//! │                                                                         │
//! │  3. SUBMITTED → 4. PAID                                                │
//! │     └── status stamps only                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every write transaction here starts with its UPDATE or INSERT. SQLite
//! hands the write lock to one transaction at a time, so a second caller
//! waits out the busy timeout and then sees the first one's commit. Status
//! changes are guarded with `AND status = ?`; when that matches nothing,
//! the status is read back to report why.

use backoffice_core::calendar::ReturnSpan;
use backoffice_core::invoice::Invoice;
use backoffice_core::validation::validate_required;
use backoffice_core::vat_return::{
    distinct_ids, return_period_start, NewVatReturn, ReturnTotals, VatReturn,
    VatReturnStatus, YearlyStats,
};
use backoffice_core::CoreError;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::columns;
use crate::error::{DbError, DbResult};
use crate::repository::invoice::{buckets_from_row, invoice_from_row, INVOICE_COLUMNS};

const RETURN_COLUMNS: &str = r#"
    id, return_period, period_start, period_end, status,
    total_net, total_vat, total_gross,
    standard_net, standard_vat, reduced_net, reduced_vat,
    second_reduced_net, second_reduced_vat, zero_net, zero_vat,
    notes, submitted_date, reference_number, is_historical,
    created_by, finalized_by, finalized_at, created_at, updated_at
"#;

/// Repository for VAT returns.
#[derive(Debug, Clone)]
pub struct VatReturnRepository {
    pool: SqlitePool,
}

impl VatReturnRepository {
    /// Creates a new VatReturnRepository.
    pub fn new(pool: SqlitePool) -> Self {
        VatReturnRepository { pool }
    }

    // =========================================================================
    // Draft
    // =========================================================================

    /// Creates a draft return owning `new.invoice_ids`.
    ///
    /// Every listed invoice must still be unassigned when the claim runs.
    /// If any was taken in the meantime the whole draft is rolled back
    /// with `AssignmentConflict`.
    pub async fn create_draft(&self, new: &NewVatReturn) -> DbResult<VatReturn> {
        let invoice_ids = new.validate()?;
        let return_period = new.return_period.trim().to_string();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO vat_returns (
                id, return_period, period_start, period_end, status,
                notes, is_historical, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 'draft', ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&id)
        .bind(&return_period)
        .bind(return_period_start(new.period_end))
        .bind(new.period_end)
        .bind(&new.notes)
        .bind(new.is_historical)
        .bind(&new.created_by)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| period_conflict(e.into(), &return_period))?;

        claim_invoices(&mut tx, &id, &invoice_ids).await?;
        let totals = recalculate_in(&mut tx, &id).await?;
        tx.commit().await?;

        info!(
            return_id = %id,
            period = %return_period,
            invoices = invoice_ids.len(),
            total_vat = %totals.total_vat,
            "Created draft VAT return"
        );

        self.get(&id).await
    }

    /// Adds unassigned invoices to a draft return.
    pub async fn add_invoices(&self, return_id: &str, invoice_ids: &[String]) -> DbResult<VatReturn> {
        let invoice_ids = distinct_ids(invoice_ids)?;

        let mut tx = self.pool.begin().await?;
        load_in(&mut tx, return_id).await?.ensure_draft()?;
        claim_invoices(&mut tx, return_id, &invoice_ids).await?;
        recalculate_in(&mut tx, return_id).await?;
        tx.commit().await?;

        debug!(return_id = %return_id, added = invoice_ids.len(), "Added invoices to VAT return");
        self.get(return_id).await
    }

    /// Takes one invoice out of a draft return.
    pub async fn remove_invoice(&self, return_id: &str, invoice_id: &str) -> DbResult<VatReturn> {
        let mut tx = self.pool.begin().await?;
        load_in(&mut tx, return_id).await?.ensure_draft()?;

        let result = sqlx::query(
            "UPDATE invoices SET vat_return_id = NULL, updated_at = ?3 WHERE id = ?1 AND vat_return_id = ?2",
        )
        .bind(invoice_id)
        .bind(return_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Ownership {
                invoice_id: invoice_id.to_string(),
                return_id: return_id.to_string(),
            }
            .into());
        }

        recalculate_in(&mut tx, return_id).await?;
        tx.commit().await?;

        debug!(return_id = %return_id, invoice_id = %invoice_id, "Removed invoice from VAT return");
        self.get(return_id).await
    }

    /// Re-sums the totals of a draft from the invoices it owns.
    pub async fn recalculate_totals(&self, return_id: &str) -> DbResult<VatReturn> {
        let mut tx = self.pool.begin().await?;
        load_in(&mut tx, return_id).await?.ensure_draft()?;
        recalculate_in(&mut tx, return_id).await?;
        tx.commit().await?;

        self.get(return_id).await
    }

    /// Deletes a draft and releases its invoices.
    ///
    /// ## Returns
    /// Number of invoices released.
    pub async fn destroy(&self, return_id: &str) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;
        load_in(&mut tx, return_id).await?.ensure_draft()?;

        let released = sqlx::query(
            "UPDATE invoices SET vat_return_id = NULL, updated_at = ?2 WHERE vat_return_id = ?1",
        )
        .bind(return_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM vat_returns WHERE id = ?1")
            .bind(return_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(return_id = %return_id, released, "Deleted draft VAT return");
        Ok(released)
    }

    // =========================================================================
    // Status Changes
    // =========================================================================

    /// Locks a draft.
    ///
    /// Totals are not recalculated here; they stay as the last draft
    /// mutation or `recalculate_totals` left them.
    pub async fn finalize(&self, return_id: &str, finalized_by: Option<&str>) -> DbResult<VatReturn> {
        let mut tx = self.pool.begin().await?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE vat_returns
            SET status = 'finalized', finalized_by = ?2, finalized_at = ?3, updated_at = ?3
            WHERE id = ?1 AND status = 'draft'
            "#,
        )
        .bind(return_id)
        .bind(finalized_by)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let status = return_status_in(&mut tx, return_id).await?;
            warn!(return_id = %return_id, status = %status, "VAT return is not a draft");
            return Err(CoreError::ImmutableReturn {
                return_id: return_id.to_string(),
                status,
            }
            .into());
        }

        // Dropping the transaction on a failed check puts the draft back.
        let vat_return = load_in(&mut tx, return_id).await?;
        let invoice_count = count_in(&mut tx, return_id).await?;
        vat_return.check_contents(invoice_count)?;

        tx.commit().await?;

        info!(
            return_id = %return_id,
            period = %vat_return.return_period,
            invoices = invoice_count,
            total_vat = %vat_return.totals.total_vat,
            "Finalized VAT return"
        );

        self.get(return_id).await
    }

    /// Records that a finalized return was filed.
    pub async fn mark_submitted(
        &self,
        return_id: &str,
        reference_number: &str,
        submitted_date: NaiveDate,
    ) -> DbResult<VatReturn> {
        let reference_number = validate_required("reference_number", reference_number, 100)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE vat_returns
            SET status = 'submitted', reference_number = ?2, submitted_date = ?3, updated_at = ?4
            WHERE id = ?1 AND status = 'finalized'
            "#,
        )
        .bind(return_id)
        .bind(&reference_number)
        .bind(submitted_date)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let from = return_status_in(&mut tx, return_id).await?;
            return Err(CoreError::InvalidTransition {
                from,
                to: VatReturnStatus::Submitted,
            }
            .into());
        }
        tx.commit().await?;

        info!(return_id = %return_id, reference = %reference_number, "Submitted VAT return");
        self.get(return_id).await
    }

    /// Records that the VAT on a submitted return was paid.
    pub async fn mark_paid(&self, return_id: &str) -> DbResult<VatReturn> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE vat_returns SET status = 'paid', updated_at = ?2 WHERE id = ?1 AND status = 'submitted'",
        )
        .bind(return_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let from = return_status_in(&mut tx, return_id).await?;
            return Err(CoreError::InvalidTransition {
                from,
                to: VatReturnStatus::Paid,
            }
            .into());
        }
        tx.commit().await?;

        info!(return_id = %return_id, "Marked VAT return paid");
        self.get(return_id).await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a VAT return by ID.
    pub async fn get(&self, return_id: &str) -> DbResult<VatReturn> {
        let sql = format!("SELECT {} FROM vat_returns WHERE id = ?1", RETURN_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(return_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("VAT return", return_id))?;

        return_from_row(&row)
    }

    /// Invoices owned by a return.
    pub async fn invoices_for(&self, return_id: &str) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE vat_return_id = ?1 ORDER BY supplier_name, invoice_date",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(return_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(invoice_from_row).collect()
    }

    /// Returns newest period first, optionally filtered by the year the
    /// period ends in and by status.
    pub async fn list(
        &self,
        year: Option<i32>,
        status: Option<VatReturnStatus>,
    ) -> DbResult<Vec<VatReturn>> {
        let sql = format!(
            r#"
            SELECT {} FROM vat_returns
            WHERE (?1 IS NULL OR strftime('%Y', period_end) = ?1)
              AND (?2 IS NULL OR status = ?2)
            ORDER BY period_end DESC
            "#,
            RETURN_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(year.map(|y| format!("{:04}", y)))
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(return_from_row).collect()
    }

    /// The most recent returns by period end.
    pub async fn recent(&self, limit: i64) -> DbResult<Vec<VatReturn>> {
        let sql = format!(
            "SELECT {} FROM vat_returns ORDER BY period_end DESC LIMIT ?1",
            RETURN_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(return_from_row).collect()
    }

    /// Date spans of every return, for the outstanding-period check.
    pub async fn spans(&self) -> DbResult<Vec<ReturnSpan>> {
        let rows: Vec<(NaiveDate, NaiveDate)> =
            sqlx::query_as("SELECT period_start, period_end FROM vat_returns ORDER BY period_start")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(period_start, period_end)| ReturnSpan {
                period_start,
                period_end,
            })
            .collect())
    }

    /// Per-year counts and totals, in the order of `years`.
    pub async fn yearly_stats(&self, years: &[i32]) -> DbResult<Vec<YearlyStats>> {
        let returns = self.list(None, None).await?;
        Ok(years
            .iter()
            .map(|&year| YearlyStats::for_year(year, &returns))
            .collect())
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

async fn load_in(tx: &mut Transaction<'_, Sqlite>, return_id: &str) -> DbResult<VatReturn> {
    let sql = format!("SELECT {} FROM vat_returns WHERE id = ?1", RETURN_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(return_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| DbError::not_found("VAT return", return_id))?;

    return_from_row(&row)
}

async fn count_in(tx: &mut Transaction<'_, Sqlite>, return_id: &str) -> DbResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE vat_return_id = ?1")
        .bind(return_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(count)
}

/// Status of a return, read inside the caller's transaction.
pub(crate) async fn return_status_in(
    tx: &mut Transaction<'_, Sqlite>,
    return_id: &str,
) -> DbResult<VatReturnStatus> {
    let status: Option<VatReturnStatus> =
        sqlx::query_scalar("SELECT status FROM vat_returns WHERE id = ?1")
            .bind(return_id)
            .fetch_optional(&mut **tx)
            .await?;

    status.ok_or_else(|| DbError::not_found("VAT return", return_id))
}

/// `return_period` carries a unique index; hitting it means the label is taken.
fn period_conflict(err: DbError, return_period: &str) -> DbError {
    match err {
        DbError::UniqueViolation { constraint } if constraint == "vat_returns.return_period" => {
            CoreError::DuplicatePeriod(return_period.to_string()).into()
        }
        other => other,
    }
}

/// Stamps every id with `return_id` if, and only if, all are unassigned.
async fn claim_invoices(
    tx: &mut Transaction<'_, Sqlite>,
    return_id: &str,
    invoice_ids: &[String],
) -> DbResult<()> {
    let mut query = QueryBuilder::<Sqlite>::new("UPDATE invoices SET vat_return_id = ");
    query.push_bind(return_id);
    query.push(", updated_at = ");
    query.push_bind(Utc::now());
    query.push(" WHERE vat_return_id IS NULL AND id IN (");
    let mut ids = query.separated(", ");
    for id in invoice_ids {
        ids.push_bind(id.as_str());
    }
    ids.push_unseparated(")");

    let claimed = query.build().execute(&mut **tx).await?.rows_affected();

    if claimed != invoice_ids.len() as u64 {
        warn!(
            return_id = %return_id,
            requested = invoice_ids.len(),
            claimed,
            "Invoice claim conflict, rolling back"
        );
        return Err(CoreError::AssignmentConflict {
            requested: invoice_ids.len(),
            claimed,
        }
        .into());
    }
    Ok(())
}

/// Re-sums a return's totals from the invoices it owns and stores them.
pub(crate) async fn recalculate_in(
    tx: &mut Transaction<'_, Sqlite>,
    return_id: &str,
) -> DbResult<ReturnTotals> {
    let sql = format!("SELECT {} FROM invoices WHERE vat_return_id = ?1", INVOICE_COLUMNS);
    let rows = sqlx::query(&sql).bind(return_id).fetch_all(&mut **tx).await?;
    let invoices = rows.iter().map(invoice_from_row).collect::<DbResult<Vec<_>>>()?;
    let totals = ReturnTotals::from_invoices(&invoices);

    let b = &totals.buckets;
    let result = sqlx::query(
        r#"
        UPDATE vat_returns SET
            total_net = ?2, total_vat = ?3, total_gross = ?4,
            standard_net = ?5, standard_vat = ?6, reduced_net = ?7, reduced_vat = ?8,
            second_reduced_net = ?9, second_reduced_vat = ?10, zero_net = ?11, zero_vat = ?12,
            updated_at = ?13
        WHERE id = ?1
        "#,
    )
    .bind(return_id)
    .bind(columns::text(totals.total_net))
    .bind(columns::text(totals.total_vat))
    .bind(columns::text(totals.total_gross))
    .bind(columns::text(b.standard_net))
    .bind(columns::text(b.standard_vat))
    .bind(columns::text(b.reduced_net))
    .bind(columns::text(b.reduced_vat))
    .bind(columns::text(b.second_reduced_net))
    .bind(columns::text(b.second_reduced_vat))
    .bind(columns::text(b.zero_net))
    .bind(columns::text(b.zero_vat))
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("VAT return", return_id));
    }

    debug!(
        return_id = %return_id,
        invoices = invoices.len(),
        total_vat = %totals.total_vat,
        "Recalculated VAT return totals"
    );
    Ok(totals)
}

fn return_from_row(row: &SqliteRow) -> DbResult<VatReturn> {
    Ok(VatReturn {
        id: row.try_get("id")?,
        return_period: row.try_get("return_period")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        status: row.try_get("status")?,
        totals: ReturnTotals {
            total_net: columns::money(row, "total_net")?,
            total_vat: columns::money(row, "total_vat")?,
            total_gross: columns::money(row, "total_gross")?,
            buckets: buckets_from_row(row)?,
        },
        notes: row.try_get("notes")?,
        submitted_date: row.try_get("submitted_date")?,
        reference_number: row.try_get("reference_number")?,
        is_historical: row.try_get("is_historical")?,
        created_by: row.try_get("created_by")?,
        finalized_by: row.try_get("finalized_by")?,
        finalized_at: row.try_get("finalized_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
