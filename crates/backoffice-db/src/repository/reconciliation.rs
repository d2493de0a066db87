//! # Cash Reconciliation Repository
//!
//! Database operations for till reconciliations, their supplier payment
//! sub-ledger and their notes log.
//!
//! ## Reconciliation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation Lifecycle                             │
//! │                                                                         │
//! │  1. OPEN (uninitialized → draft)                                       │
//! │     └── open() → saved row, or an unsaved zero draft whose floats      │
//! │         come from the till's most recent earlier reconciliation        │
//! │                                                                         │
//! │  2. SAVE (draft → saved, saved → saved)                                │
//! │     └── save() in ONE transaction:                                     │
//! │         ├── validate every amount (nothing written on failure)         │
//! │         ├── recompute counted cash and variance                        │
//! │         ├── insert or update the reconciliation row                    │
//! │         ├── DELETE all supplier payments, INSERT the new set           │
//! │         └── append the note, if one was given                          │
//! │                                                                         │
//! │  3. NOTES                                                              │
//! │     └── add_note() appends; notes are never edited or deleted          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoffice_core::reconciliation::{
    normalize_payments, CashReconciliation, DenominationCounts, FloatCarryForward,
    PosTillTotals, ReconciliationInput, ReconciliationNote, SupplierPayment, TillPaymentTotals,
    MAX_NOTE_LENGTH,
};
use backoffice_core::validation::validate_required;
use backoffice_core::{DateRange, Money};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::columns;
use crate::error::{DbError, DbResult};
use crate::pos::TillSession;

const RECONCILIATION_COLUMNS: &str = r#"
    id, date, till_id, till_name, closed_cash_id,
    cash_50, cash_20, cash_10, cash_5, cash_2, cash_1, cash_50c, cash_20c, cash_10c,
    note_float, coin_float,
    card, cash_back, cheque, debt, debt_paid_cash, debt_paid_cheque, debt_paid_card,
    free, voucher_used, money_added,
    total_cash_counted, pos_cash_total, pos_card_total, variance,
    created_by, updated_by, created_at, updated_at
"#;

/// Repository for cash reconciliations.
#[derive(Debug, Clone)]
pub struct ReconciliationRepository {
    pool: SqlitePool,
}

impl ReconciliationRepository {
    /// Creates a new ReconciliationRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ReconciliationRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a saved reconciliation by ID.
    pub async fn get(&self, id: &str) -> DbResult<CashReconciliation> {
        let sql = format!("SELECT {} FROM cash_reconciliations WHERE id = ?1", RECONCILIATION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Cash reconciliation", id))?;

        reconciliation_from_row(&row)
    }

    /// Gets the saved reconciliation for a till and day, if any.
    pub async fn find(&self, date: NaiveDate, till_id: i64) -> DbResult<Option<CashReconciliation>> {
        let sql = format!(
            "SELECT {} FROM cash_reconciliations WHERE date = ?1 AND till_id = ?2",
            RECONCILIATION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(date)
            .bind(till_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(reconciliation_from_row).transpose()
    }

    /// Floats of the till's most recent reconciliation strictly before
    /// `before`, or zeros if there is none.
    pub async fn previous_float(&self, till_id: i64, before: NaiveDate) -> DbResult<FloatCarryForward> {
        let row = sqlx::query(
            r#"
            SELECT note_float, coin_float
            FROM cash_reconciliations
            WHERE till_id = ?1 AND date < ?2
            ORDER BY date DESC
            LIMIT 1
            "#,
        )
        .bind(till_id)
        .bind(before)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(FloatCarryForward {
                note_float: columns::money(&row, "note_float")?,
                coin_float: columns::money(&row, "coin_float")?,
            }),
            None => Ok(FloatCarryForward::default()),
        }
    }

    /// Returns the saved reconciliation for a till and day, or synthesizes
    /// an unsaved draft.
    ///
    /// The draft is never written here. Its floats are carried forward from
    /// the till's previous reconciliation and, when the POS closed a cash
    /// session for that day, its POS totals are taken from the session.
    pub async fn open(
        &self,
        date: NaiveDate,
        till_id: i64,
        till_name: &str,
        session: Option<&TillSession>,
    ) -> DbResult<CashReconciliation> {
        if let Some(saved) = self.find(date, till_id).await? {
            return Ok(saved);
        }

        let floats = self.previous_float(till_id, date).await?;
        let mut draft = CashReconciliation::draft(date, till_id, till_name, floats);
        if let Some(session) = session {
            draft.closed_cash_id = Some(session.closed_cash_id.clone());
            draft.pos_cash_total = session.totals.cash;
            draft.pos_card_total = session.totals.card;
            draft.variance = draft.total_cash_counted - draft.pos_cash_total;
        }

        debug!(date = %date, till_id, "Opened unsaved reconciliation draft");
        Ok(draft)
    }

    /// Supplier payments of a reconciliation, in sequence order.
    pub async fn payments(&self, reconciliation_id: &str) -> DbResult<Vec<SupplierPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT supplier_id, payee_name, amount, sequence, description
            FROM cash_reconciliation_payments
            WHERE cash_reconciliation_id = ?1
            ORDER BY sequence
            "#,
        )
        .bind(reconciliation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payment_from_row).collect()
    }

    /// Notes of a reconciliation, oldest first.
    pub async fn notes(&self, reconciliation_id: &str) -> DbResult<Vec<ReconciliationNote>> {
        let rows = sqlx::query(
            r#"
            SELECT id, cash_reconciliation_id, message, author, created_at
            FROM cash_reconciliation_notes
            WHERE cash_reconciliation_id = ?1
            ORDER BY id
            "#,
        )
        .bind(reconciliation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(note_from_row).collect()
    }

    /// Message of the most recent note, if any.
    pub async fn latest_note(&self, reconciliation_id: &str) -> DbResult<Option<String>> {
        let message: Option<String> = sqlx::query_scalar(
            r#"
            SELECT message FROM cash_reconciliation_notes
            WHERE cash_reconciliation_id = ?1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(reconciliation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Most recent reconciliations, newest first, optionally for one till.
    pub async fn history(&self, till_id: Option<i64>, limit: i64) -> DbResult<Vec<CashReconciliation>> {
        let sql = format!(
            r#"
            SELECT {} FROM cash_reconciliations
            WHERE (?1 IS NULL OR till_id = ?1)
            ORDER BY date DESC, till_id
            LIMIT ?2
            "#,
            RECONCILIATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(till_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(reconciliation_from_row).collect()
    }

    /// Reconciliations dated within the range, oldest first.
    pub async fn in_range(&self, range: DateRange, till_id: Option<i64>) -> DbResult<Vec<CashReconciliation>> {
        let sql = format!(
            r#"
            SELECT {} FROM cash_reconciliations
            WHERE date BETWEEN ?1 AND ?2 AND (?3 IS NULL OR till_id = ?3)
            ORDER BY date, till_id
            "#,
            RECONCILIATION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(range.start)
            .bind(range.end)
            .bind(till_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(reconciliation_from_row).collect()
    }

    /// The latest reconciliation on or before `date`, across all tills.
    pub async fn latest_on_or_before(&self, date: NaiveDate) -> DbResult<Option<CashReconciliation>> {
        let sql = format!(
            r#"
            SELECT {} FROM cash_reconciliations
            WHERE date <= ?1
            ORDER BY date DESC, updated_at DESC
            LIMIT 1
            "#,
            RECONCILIATION_COLUMNS
        );
        let row = sqlx::query(&sql).bind(date).fetch_optional(&self.pool).await?;

        row.as_ref().map(reconciliation_from_row).transpose()
    }

    /// Sum of supplier cash payments on reconciliations dated within the range.
    pub async fn supplier_payments_total(&self, range: DateRange) -> DbResult<Money> {
        let rows = sqlx::query(
            r#"
            SELECT p.amount
            FROM cash_reconciliation_payments p
            JOIN cash_reconciliations r ON r.id = p.cash_reconciliation_id
            WHERE r.date BETWEEN ?1 AND ?2
            "#,
        )
        .bind(range.start)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| columns::money(row, "amount"))
            .sum::<DbResult<Money>>()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Saves a reconciliation with the submitted figures.
    ///
    /// ## What This Does
    /// 1. Validates the input; nothing is written if any amount is invalid
    /// 2. Recomputes counted cash and variance from the input and the
    ///    reconciliation's POS totals
    /// 3. In one transaction: writes the row, replaces the whole supplier
    ///    payment set, appends the note
    ///
    /// An unsaved draft (`id == None`) is inserted, or merged into a row
    /// saved concurrently for the same till and day. A record carrying an
    /// ID that doesn't exist fails with `NotFound` and writes nothing.
    pub async fn save(
        &self,
        reconciliation: &CashReconciliation,
        input: &ReconciliationInput,
    ) -> DbResult<CashReconciliation> {
        input.validate()?;

        let payments = normalize_payments(&input.supplier_payments);
        let pos = PosTillTotals {
            cash: reconciliation.pos_cash_total,
            card: reconciliation.pos_card_total,
            ..Default::default()
        };

        let mut record = reconciliation.clone();
        let totals = record.apply(input, &pos, &payments);
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let id = match record.id.clone() {
            Some(id) => {
                update_row(&mut tx, &id, &record, now).await?;
                id
            }
            None => {
                let existing: Option<(String, Option<String>)> = sqlx::query_as(
                    "SELECT id, created_by FROM cash_reconciliations WHERE date = ?1 AND till_id = ?2",
                )
                .bind(record.date)
                .bind(record.till_id)
                .fetch_optional(&mut *tx)
                .await?;

                match existing {
                    Some((id, created_by)) => {
                        record.created_by = created_by.or(record.created_by);
                        update_row(&mut tx, &id, &record, now).await?;
                        id
                    }
                    None => {
                        let id = Uuid::new_v4().to_string();
                        record.created_at = Some(now);
                        insert_row(&mut tx, &id, &record, now).await?;
                        id
                    }
                }
            }
        };

        sqlx::query("DELETE FROM cash_reconciliation_payments WHERE cash_reconciliation_id = ?1")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        for payment in &payments {
            sqlx::query(
                r#"
                INSERT INTO cash_reconciliation_payments
                    (cash_reconciliation_id, supplier_id, payee_name, amount, sequence, description)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(&id)
            .bind(&payment.supplier_id)
            .bind(&payment.payee_name)
            .bind(columns::text(payment.amount))
            .bind(payment.sequence)
            .bind(&payment.description)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(note) = input.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            insert_note(&mut tx, &id, note, &input.user, now).await?;
        }

        tx.commit().await?;

        info!(
            id = %id,
            date = %record.date,
            till_id = record.till_id,
            payments = payments.len(),
            variance = %totals.variance,
            "Saved cash reconciliation"
        );

        self.get(&id).await
    }

    /// Appends a note to a saved reconciliation.
    pub async fn add_note(
        &self,
        reconciliation_id: &str,
        message: &str,
        author: &str,
    ) -> DbResult<ReconciliationNote> {
        let message = validate_required("message", message, MAX_NOTE_LENGTH)?;
        let author = validate_required("author", author, 255)?;

        let mut tx = self.pool.begin().await?;

        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM cash_reconciliations WHERE id = ?1")
                .bind(reconciliation_id)
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(DbError::not_found("Cash reconciliation", reconciliation_id));
        }

        let now = Utc::now();
        let id = insert_note(&mut tx, reconciliation_id, &message, &author, now).await?;
        tx.commit().await?;

        debug!(reconciliation_id = %reconciliation_id, note_id = id, "Added reconciliation note");

        Ok(ReconciliationNote {
            id,
            reconciliation_id: reconciliation_id.to_string(),
            message,
            author,
            created_at: now,
        })
    }
}

// =============================================================================
// Row Writers
// =============================================================================

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    rec: &CashReconciliation,
    now: chrono::DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO cash_reconciliations (
            id, date, till_id, till_name, closed_cash_id,
            cash_50, cash_20, cash_10, cash_5, cash_2, cash_1, cash_50c, cash_20c, cash_10c,
            note_float, coin_float,
            card, cash_back, cheque, debt, debt_paid_cash, debt_paid_cheque, debt_paid_card,
            free, voucher_used, money_added,
            total_cash_counted, pos_cash_total, pos_card_total, variance,
            created_by, updated_by, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
            ?15, ?16,
            ?17, ?18, ?19, ?20, ?21, ?22, ?23,
            ?24, ?25, ?26,
            ?27, ?28, ?29, ?30,
            ?31, ?32, ?33, ?33
        )
        "#,
    )
    .bind(id)
    .bind(rec.date)
    .bind(rec.till_id)
    .bind(&rec.till_name)
    .bind(&rec.closed_cash_id)
    .bind(rec.counts.cash_50)
    .bind(rec.counts.cash_20)
    .bind(rec.counts.cash_10)
    .bind(rec.counts.cash_5)
    .bind(rec.counts.cash_2)
    .bind(rec.counts.cash_1)
    .bind(rec.counts.cash_50c)
    .bind(rec.counts.cash_20c)
    .bind(rec.counts.cash_10c)
    .bind(columns::text(rec.floats.note_float))
    .bind(columns::text(rec.floats.coin_float))
    .bind(columns::text(rec.payment_totals.card))
    .bind(columns::text(rec.payment_totals.cash_back))
    .bind(columns::text(rec.payment_totals.cheque))
    .bind(columns::text(rec.payment_totals.debt))
    .bind(columns::text(rec.payment_totals.debt_paid_cash))
    .bind(columns::text(rec.payment_totals.debt_paid_cheque))
    .bind(columns::text(rec.payment_totals.debt_paid_card))
    .bind(columns::text(rec.payment_totals.free))
    .bind(columns::text(rec.payment_totals.voucher_used))
    .bind(columns::text(rec.payment_totals.money_added))
    .bind(columns::text(rec.total_cash_counted))
    .bind(columns::text(rec.pos_cash_total))
    .bind(columns::text(rec.pos_card_total))
    .bind(columns::text(rec.variance))
    .bind(&rec.created_by)
    .bind(&rec.updated_by)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn update_row(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
    rec: &CashReconciliation,
    now: chrono::DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE cash_reconciliations SET
            closed_cash_id = COALESCE(?2, closed_cash_id),
            cash_50 = ?3, cash_20 = ?4, cash_10 = ?5, cash_5 = ?6, cash_2 = ?7,
            cash_1 = ?8, cash_50c = ?9, cash_20c = ?10, cash_10c = ?11,
            note_float = ?12, coin_float = ?13,
            card = ?14, cash_back = ?15, cheque = ?16, debt = ?17,
            debt_paid_cash = ?18, debt_paid_cheque = ?19, debt_paid_card = ?20,
            free = ?21, voucher_used = ?22, money_added = ?23,
            total_cash_counted = ?24, pos_cash_total = ?25, pos_card_total = ?26,
            variance = ?27,
            created_by = COALESCE(created_by, ?28),
            updated_by = ?29,
            updated_at = ?30
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(&rec.closed_cash_id)
    .bind(rec.counts.cash_50)
    .bind(rec.counts.cash_20)
    .bind(rec.counts.cash_10)
    .bind(rec.counts.cash_5)
    .bind(rec.counts.cash_2)
    .bind(rec.counts.cash_1)
    .bind(rec.counts.cash_50c)
    .bind(rec.counts.cash_20c)
    .bind(rec.counts.cash_10c)
    .bind(columns::text(rec.floats.note_float))
    .bind(columns::text(rec.floats.coin_float))
    .bind(columns::text(rec.payment_totals.card))
    .bind(columns::text(rec.payment_totals.cash_back))
    .bind(columns::text(rec.payment_totals.cheque))
    .bind(columns::text(rec.payment_totals.debt))
    .bind(columns::text(rec.payment_totals.debt_paid_cash))
    .bind(columns::text(rec.payment_totals.debt_paid_cheque))
    .bind(columns::text(rec.payment_totals.debt_paid_card))
    .bind(columns::text(rec.payment_totals.free))
    .bind(columns::text(rec.payment_totals.voucher_used))
    .bind(columns::text(rec.payment_totals.money_added))
    .bind(columns::text(rec.total_cash_counted))
    .bind(columns::text(rec.pos_cash_total))
    .bind(columns::text(rec.pos_card_total))
    .bind(columns::text(rec.variance))
    .bind(&rec.created_by)
    .bind(&rec.updated_by)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Cash reconciliation", id));
    }

    Ok(())
}

async fn insert_note(
    tx: &mut Transaction<'_, Sqlite>,
    reconciliation_id: &str,
    message: &str,
    author: &str,
    now: chrono::DateTime<Utc>,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO cash_reconciliation_notes (cash_reconciliation_id, message, author, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(reconciliation_id)
    .bind(message)
    .bind(author)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(result.last_insert_rowid())
}

// =============================================================================
// Row Readers
// =============================================================================

fn reconciliation_from_row(row: &SqliteRow) -> DbResult<CashReconciliation> {
    let counts = DenominationCounts {
        cash_50: row.try_get("cash_50")?,
        cash_20: row.try_get("cash_20")?,
        cash_10: row.try_get("cash_10")?,
        cash_5: row.try_get("cash_5")?,
        cash_2: row.try_get("cash_2")?,
        cash_1: row.try_get("cash_1")?,
        cash_50c: row.try_get("cash_50c")?,
        cash_20c: row.try_get("cash_20c")?,
        cash_10c: row.try_get("cash_10c")?,
    };

    let payment_totals = TillPaymentTotals {
        card: columns::money(row, "card")?,
        cash_back: columns::money(row, "cash_back")?,
        cheque: columns::money(row, "cheque")?,
        debt: columns::money(row, "debt")?,
        debt_paid_cash: columns::money(row, "debt_paid_cash")?,
        debt_paid_cheque: columns::money(row, "debt_paid_cheque")?,
        debt_paid_card: columns::money(row, "debt_paid_card")?,
        free: columns::money(row, "free")?,
        voucher_used: columns::money(row, "voucher_used")?,
        money_added: columns::money(row, "money_added")?,
    };

    Ok(CashReconciliation {
        id: Some(row.try_get("id")?),
        date: row.try_get("date")?,
        till_id: row.try_get("till_id")?,
        till_name: row.try_get("till_name")?,
        closed_cash_id: row.try_get("closed_cash_id")?,
        counts,
        floats: FloatCarryForward {
            note_float: columns::money(row, "note_float")?,
            coin_float: columns::money(row, "coin_float")?,
        },
        payment_totals,
        total_cash_counted: columns::money(row, "total_cash_counted")?,
        pos_cash_total: columns::money(row, "pos_cash_total")?,
        pos_card_total: columns::money(row, "pos_card_total")?,
        variance: columns::money(row, "variance")?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
        created_at: Some(row.try_get("created_at")?),
        updated_at: Some(row.try_get("updated_at")?),
    })
}

fn payment_from_row(row: &SqliteRow) -> DbResult<SupplierPayment> {
    Ok(SupplierPayment {
        supplier_id: row.try_get("supplier_id")?,
        payee_name: row.try_get("payee_name")?,
        amount: columns::money(row, "amount")?,
        sequence: row.try_get("sequence")?,
        description: row.try_get("description")?,
    })
}

fn note_from_row(row: &SqliteRow) -> DbResult<ReconciliationNote> {
    Ok(ReconciliationNote {
        id: row.try_get("id")?,
        reconciliation_id: row.try_get("cash_reconciliation_id")?,
        message: row.try_get("message")?,
        author: row.try_get("author")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use backoffice_core::reconciliation::SupplierPaymentInput;
    use backoffice_core::{CoreError, ValidationError};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    fn session(cash: &str) -> TillSession {
        TillSession {
            closed_cash_id: "money-1".to_string(),
            totals: PosTillTotals {
                cash: money(cash),
                ..Default::default()
            },
        }
    }

    fn input(note_float: &str) -> ReconciliationInput {
        ReconciliationInput {
            counts: DenominationCounts {
                cash_50: 2,
                cash_20: 1,
                ..Default::default()
            },
            floats: FloatCarryForward {
                note_float: money(note_float),
                coin_float: money("5.00"),
            },
            user: "alice".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_without_history_is_zero_draft() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let draft = db
            .reconciliations()
            .open(date(2025, 3, 10), 1, "Till 1", None)
            .await
            .unwrap();

        assert!(!draft.is_persisted());
        assert_eq!(draft.floats, FloatCarryForward::default());
        assert_eq!(draft.total_cash_counted, Money::ZERO);

        // Opening never writes
        assert!(db.reconciliations().find(date(2025, 3, 10), 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_computes_variance() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();
        let draft = repo
            .open(date(2025, 3, 10), 1, "Till 1", Some(&session("120.00")))
            .await
            .unwrap();

        let saved = repo.save(&draft, &input("0")).await.unwrap();

        assert!(saved.is_persisted());
        assert_eq!(saved.total_cash_counted, money("125.00"));
        assert_eq!(saved.pos_cash_total, money("120.00"));
        assert_eq!(saved.variance, money("5.00"));
        assert_eq!(saved.closed_cash_id.as_deref(), Some("money-1"));
        assert_eq!(saved.created_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_float_carries_forward_to_next_day() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();

        let first = repo.open(date(2025, 3, 10), 1, "Till 1", None).await.unwrap();
        repo.save(&first, &input("200")).await.unwrap();

        let next = repo.open(date(2025, 3, 11), 1, "Till 1", None).await.unwrap();
        assert_eq!(next.floats.note_float, money("200"));
        assert_eq!(next.floats.coin_float, money("5.00"));

        // Other tills don't inherit it
        let other = repo.open(date(2025, 3, 11), 2, "Till 2", None).await.unwrap();
        assert_eq!(other.floats.note_float, Money::ZERO);
    }

    #[tokio::test]
    async fn test_payments_are_replaced_on_save() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();
        let draft = repo
            .open(date(2025, 3, 10), 1, "Till 1", Some(&session("120.00")))
            .await
            .unwrap();

        let mut first = input("0");
        first.supplier_payments = vec![
            SupplierPaymentInput {
                supplier_id: None,
                payee_name: "Milk Co".to_string(),
                amount: money("20.00"),
                description: None,
            },
            SupplierPaymentInput {
                supplier_id: None,
                payee_name: "Bread Ltd".to_string(),
                amount: money("10.00"),
                description: Some("rolls".to_string()),
            },
        ];
        let saved = repo.save(&draft, &first).await.unwrap();
        assert_eq!(saved.variance, money("35.00"));
        assert_eq!(repo.payments(saved.id.as_deref().unwrap()).await.unwrap().len(), 2);

        let mut second = input("0");
        second.supplier_payments = vec![SupplierPaymentInput {
            supplier_id: None,
            payee_name: "Milk Co".to_string(),
            amount: money("20.00"),
            description: None,
        }];
        let resaved = repo.save(&saved, &second).await.unwrap();
        let payments = repo.payments(resaved.id.as_deref().unwrap()).await.unwrap();

        assert_eq!(resaved.id, saved.id);
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].payee_name, "Milk Co");
        assert_eq!(resaved.variance, money("25.00"));
    }

    #[tokio::test]
    async fn test_saving_twice_is_idempotent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();
        let draft = repo
            .open(date(2025, 3, 10), 1, "Till 1", Some(&session("120.00")))
            .await
            .unwrap();

        let first = repo.save(&draft, &input("50")).await.unwrap();
        let second = repo.save(&first, &input("50")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.counts, second.counts);
        assert_eq!(first.variance, second.variance);
        assert_eq!(first.total_cash_counted, second.total_cash_counted);
    }

    #[tokio::test]
    async fn test_save_unknown_id_is_not_found() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();
        let mut ghost = repo.open(date(2025, 3, 10), 1, "Till 1", None).await.unwrap();
        ghost.id = Some("does-not-exist".to_string());

        let err = repo.save(&ghost, &input("0")).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert!(repo.find(date(2025, 3, 10), 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_negative_count_writes_nothing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();
        let draft = repo.open(date(2025, 3, 10), 1, "Till 1", None).await.unwrap();

        let mut bad = input("0");
        bad.counts.cash_5 = -1;
        let err = repo.save(&draft, &bad).await.unwrap_err();

        assert!(matches!(
            err,
            DbError::Core(CoreError::Validation(ValidationError::Negative { .. }))
        ));
        assert!(repo.find(date(2025, 3, 10), 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notes_are_appended_in_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();
        let draft = repo.open(date(2025, 3, 10), 1, "Till 1", None).await.unwrap();

        let mut with_note = input("0");
        with_note.note = Some("Float short by a euro".to_string());
        let saved = repo.save(&draft, &with_note).await.unwrap();
        let id = saved.id.unwrap();

        repo.add_note(&id, "Recounted, fine", "bob").await.unwrap();

        let notes = repo.notes(&id).await.unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].author, "alice");
        assert_eq!(notes[1].message, "Recounted, fine");
        assert_eq!(repo.latest_note(&id).await.unwrap().as_deref(), Some("Recounted, fine"));

        let err = repo.add_note("missing", "hello", "bob").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_history_and_supplier_totals() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.reconciliations();

        for (day, till) in [(10, 1), (11, 1), (11, 2)] {
            let draft = repo.open(date(2025, 3, day), till, "Till", None).await.unwrap();
            let mut data = input("0");
            data.supplier_payments = vec![SupplierPaymentInput {
                supplier_id: None,
                payee_name: "Window cleaner".to_string(),
                amount: money("12.50"),
                description: None,
            }];
            repo.save(&draft, &data).await.unwrap();
        }

        let all = repo.history(None, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].date, date(2025, 3, 11));

        let till_one = repo.history(Some(1), 1).await.unwrap();
        assert_eq!(till_one.len(), 1);
        assert_eq!(till_one[0].till_id, 1);

        let range = DateRange::new(date(2025, 3, 11), date(2025, 3, 31)).unwrap();
        assert_eq!(repo.supplier_payments_total(range).await.unwrap(), money("25.00"));
        assert_eq!(repo.in_range(range, Some(2)).await.unwrap().len(), 1);

        let latest = repo.latest_on_or_before(date(2025, 3, 10)).await.unwrap().unwrap();
        assert_eq!(latest.date, date(2025, 3, 10));
    }
}
