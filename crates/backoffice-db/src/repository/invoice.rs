//! # Invoice Repository
//!
//! Purchase invoices and their VAT lines.
//!
//! ## Creation Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Manual / bulk-parsed              External accounting import           │
//! │  create()                          upsert_external()                    │
//! │    │                                 │  keyed by external_id            │
//! │    ▼                                 ▼                                  │
//! │  ┌───────────────────────────────────────────────────────────────┐      │
//! │  │ validate → compute lines → buckets → totals → resolve supplier│      │
//! │  └───────────────────────────────────────────────────────────────┘      │
//! │    │                                                                    │
//! │    ▼                                                                    │
//! │  ONE transaction: invoice row + every VAT line                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Invoices owned by a return that is no longer a draft are frozen: their
//! lines and amounts can't change. Payment status stays editable.

use backoffice_core::invoice::{
    build_lines, classify_into_buckets, Invoice, InvoiceCostSummary, InvoiceLine,
    InvoiceLineInput, NewInvoice, PaymentStatus, VatBuckets,
};
use backoffice_core::reporting::UnsubmittedSummary;
use backoffice_core::{CoreError, DateRange, Money, ValidationError, VatRateTable};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::columns;
use crate::error::{DbError, DbResult};
use crate::repository::supplier::SupplierResolver;
use crate::repository::vat_return::{recalculate_in, return_status_in};

pub(crate) const INVOICE_COLUMNS: &str = r#"
    id, invoice_number, supplier_id, supplier_name, invoice_date, due_date,
    standard_net, standard_vat, reduced_net, reduced_vat,
    second_reduced_net, second_reduced_vat, zero_net, zero_vat,
    subtotal, vat_amount, total_amount,
    payment_status, payment_date, payment_method, payment_reference,
    expense_category, notes, external_id, vat_return_id, created_at, updated_at
"#;

/// Repository for purchase invoices.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Creates an invoice with its VAT lines.
    ///
    /// The supplier name goes through `suppliers`, which creates unknown
    /// suppliers. Totals are derived from the lines.
    pub async fn create(
        &self,
        new: &NewInvoice,
        rates: &VatRateTable,
        suppliers: &dyn SupplierResolver,
    ) -> DbResult<Invoice> {
        new.validate()?;
        let lines = build_lines(&new.lines, rates, new.invoice_date)?;
        let supplier = suppliers.resolve(&new.supplier_name).await?;

        let now = Utc::now();
        let mut invoice = Invoice {
            id: Uuid::new_v4().to_string(),
            invoice_number: new.invoice_number.trim().to_string(),
            supplier_id: supplier.id,
            supplier_name: supplier.name,
            invoice_date: new.invoice_date,
            due_date: new.due_date,
            buckets: VatBuckets::default(),
            subtotal: Money::ZERO,
            vat_amount: Money::ZERO,
            total_amount: Money::ZERO,
            payment_status: new.payment_status,
            payment_date: new.payment_date,
            payment_method: new.payment_method.clone(),
            payment_reference: new.payment_reference.clone(),
            expense_category: new.expense_category.clone(),
            notes: new.notes.clone(),
            external_id: new.external_id.clone(),
            vat_return_id: None,
            created_at: now,
            updated_at: now,
        };
        invoice.apply_buckets(classify_into_buckets(&lines));

        let mut tx = self.pool.begin().await?;
        insert_row(&mut tx, &invoice).await?;
        replace_lines(&mut tx, &invoice.id, &lines).await?;
        tx.commit().await?;

        info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            supplier = %invoice.supplier_name,
            total = %invoice.total_amount,
            lines = lines.len(),
            "Created invoice"
        );

        Ok(invoice)
    }

    /// Creates or updates the invoice carrying `new.external_id`.
    ///
    /// Re-importing the same external invoice updates it in place and
    /// never touches its VAT return assignment. An invoice owned by a
    /// return that is no longer a draft can't be changed.
    pub async fn upsert_external(
        &self,
        new: &NewInvoice,
        rates: &VatRateTable,
        suppliers: &dyn SupplierResolver,
    ) -> DbResult<Invoice> {
        let external_id = match new.external_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(ValidationError::RequiredWhen {
                    field: "external_id".to_string(),
                    condition: "importing from an external source".to_string(),
                }
                .into())
            }
        };

        let existing = match self.find_by_external_id(&external_id).await? {
            Some(existing) => existing,
            None => return self.create(new, rates, suppliers).await,
        };

        new.validate()?;
        let lines = build_lines(&new.lines, rates, new.invoice_date)?;
        let supplier = suppliers.resolve(&new.supplier_name).await?;

        let mut invoice = Invoice {
            invoice_number: new.invoice_number.trim().to_string(),
            supplier_id: supplier.id,
            supplier_name: supplier.name,
            invoice_date: new.invoice_date,
            due_date: new.due_date,
            payment_status: new.payment_status,
            payment_date: new.payment_date,
            payment_method: new.payment_method.clone(),
            payment_reference: new.payment_reference.clone(),
            expense_category: new.expense_category.clone(),
            notes: new.notes.clone(),
            updated_at: Utc::now(),
            ..existing
        };
        invoice.apply_buckets(classify_into_buckets(&lines));
        let invoice = self.save_lines(invoice, &lines).await?;

        info!(
            invoice_id = %invoice.id,
            external_id = %external_id,
            total = %invoice.total_amount,
            "Updated imported invoice"
        );

        Ok(invoice)
    }

    /// Replaces the VAT lines of an invoice and re-derives its totals.
    ///
    /// If the invoice sits in a draft return, that return's totals are
    /// recalculated in the same transaction.
    pub async fn update_lines(
        &self,
        id: &str,
        inputs: &[InvoiceLineInput],
        rates: &VatRateTable,
    ) -> DbResult<Invoice> {
        if inputs.is_empty() {
            return Err(ValidationError::Required {
                field: "lines".to_string(),
            }
            .into());
        }

        let mut invoice = self.get(id).await?;
        let lines = build_lines(inputs, rates, invoice.invoice_date)?;
        invoice.apply_buckets(classify_into_buckets(&lines));
        invoice.updated_at = Utc::now();
        let invoice = self.save_lines(invoice, &lines).await?;

        debug!(invoice_id = %id, lines = lines.len(), "Replaced invoice VAT lines");
        Ok(invoice)
    }

    /// Writes the amounts of `invoice` and replaces its lines.
    ///
    /// `invoice` was read before the transaction, so its `vat_return_id`
    /// may be stale. The owner is read again after the row is updated.
    async fn save_lines(&self, mut invoice: Invoice, lines: &[InvoiceLine]) -> DbResult<Invoice> {
        let mut tx = self.pool.begin().await?;
        // The UPDATE takes the write lock, so the owner can't change until commit.
        update_row(&mut tx, &invoice).await?;
        invoice.vat_return_id = owner_in(&mut tx, &invoice.id).await?;
        ensure_editable(&mut tx, &invoice).await?;

        replace_lines(&mut tx, &invoice.id, lines).await?;
        if let Some(return_id) = &invoice.vat_return_id {
            recalculate_in(&mut tx, return_id).await?;
        }
        tx.commit().await?;

        Ok(invoice)
    }

    /// Changes the payment status. Moving to `paid` needs a payment date.
    pub async fn set_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
        payment_date: Option<NaiveDate>,
    ) -> DbResult<Invoice> {
        let mut invoice = self.get(id).await?;
        invoice.set_payment_status(status, payment_date)?;
        invoice.updated_at = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET payment_status = ?2, payment_date = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(invoice.payment_status)
        .bind(invoice.payment_date)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Invoice", id));
        }

        info!(invoice_id = %id, status = %status, "Changed invoice payment status");
        Ok(invoice)
    }

    /// Moves pending invoices past their due date to overdue.
    ///
    /// ## Returns
    /// Number of invoices changed.
    pub async fn refresh_overdue(&self, today: NaiveDate) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET payment_status = 'overdue', updated_at = ?2
            WHERE payment_status = 'pending'
              AND due_date IS NOT NULL
              AND due_date < ?1
            "#,
        )
        .bind(today)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected();
        if changed > 0 {
            info!(changed, today = %today, "Marked invoices overdue");
        }
        Ok(changed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an invoice by ID.
    pub async fn get(&self, id: &str) -> DbResult<Invoice> {
        let sql = format!("SELECT {} FROM invoices WHERE id = ?1", INVOICE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", id))?;

        invoice_from_row(&row)
    }

    /// Finds an imported invoice by its external id.
    pub async fn find_by_external_id(&self, external_id: &str) -> DbResult<Option<Invoice>> {
        let sql = format!("SELECT {} FROM invoices WHERE external_id = ?1", INVOICE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(invoice_from_row).transpose()
    }

    /// VAT lines of an invoice, by line number.
    pub async fn lines(&self, invoice_id: &str) -> DbResult<Vec<InvoiceLine>> {
        let rows = sqlx::query(
            r#"
            SELECT line_number, vat_category, net, vat_rate, vat, gross
            FROM invoice_vat_lines
            WHERE invoice_id = ?1
            ORDER BY line_number
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(line_from_row).collect()
    }

    /// Invoices not owned by any VAT return, oldest first.
    pub async fn list_unassigned(&self) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE vat_return_id IS NULL ORDER BY invoice_date, invoice_number",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(invoice_from_row).collect()
    }

    /// Invoice dates of every unassigned invoice.
    pub async fn unassigned_dates(&self) -> DbResult<Vec<NaiveDate>> {
        let dates: Vec<NaiveDate> = sqlx::query_scalar(
            "SELECT invoice_date FROM invoices WHERE vat_return_id IS NULL ORDER BY invoice_date",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(dates)
    }

    /// Invoices dated within the range.
    pub async fn in_range(&self, range: DateRange) -> DbResult<Vec<Invoice>> {
        let sql = format!(
            "SELECT {} FROM invoices WHERE invoice_date BETWEEN ?1 AND ?2 ORDER BY invoice_date, invoice_number",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(invoice_from_row).collect()
    }

    /// Invoice costs in the range, by payment status.
    pub async fn cost_summary(&self, range: DateRange) -> DbResult<InvoiceCostSummary> {
        let invoices = self.in_range(range).await?;
        Ok(InvoiceCostSummary::from_invoices(&invoices))
    }

    /// Count, amounts and monthly breakdown of unassigned invoices.
    pub async fn unsubmitted_summary(&self) -> DbResult<UnsubmittedSummary> {
        let invoices = self.list_unassigned().await?;
        Ok(UnsubmittedSummary::from_invoices(&invoices))
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Fails if the invoice belongs to a return that is no longer a draft.
async fn ensure_editable(tx: &mut Transaction<'_, Sqlite>, invoice: &Invoice) -> DbResult<()> {
    if let Some(return_id) = &invoice.vat_return_id {
        let status = return_status_in(tx, return_id).await?;
        if !status.is_draft() {
            return Err(CoreError::ImmutableReturn {
                return_id: return_id.clone(),
                status,
            }
            .into());
        }
    }
    Ok(())
}

async fn owner_in(tx: &mut Transaction<'_, Sqlite>, invoice_id: &str) -> DbResult<Option<String>> {
    let owner: Option<String> =
        sqlx::query_scalar("SELECT vat_return_id FROM invoices WHERE id = ?1")
            .bind(invoice_id)
            .fetch_one(&mut **tx)
            .await?;
    Ok(owner)
}

async fn insert_row(tx: &mut Transaction<'_, Sqlite>, invoice: &Invoice) -> DbResult<()> {
    let b = &invoice.buckets;
    sqlx::query(
        r#"
        INSERT INTO invoices (
            id, invoice_number, supplier_id, supplier_name, invoice_date, due_date,
            standard_net, standard_vat, reduced_net, reduced_vat,
            second_reduced_net, second_reduced_vat, zero_net, zero_vat,
            subtotal, vat_amount, total_amount,
            payment_status, payment_date, payment_method, payment_reference,
            expense_category, notes, external_id, vat_return_id, created_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6,
            ?7, ?8, ?9, ?10,
            ?11, ?12, ?13, ?14,
            ?15, ?16, ?17,
            ?18, ?19, ?20, ?21,
            ?22, ?23, ?24, ?25, ?26, ?27
        )
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.invoice_number)
    .bind(&invoice.supplier_id)
    .bind(&invoice.supplier_name)
    .bind(invoice.invoice_date)
    .bind(invoice.due_date)
    .bind(columns::text(b.standard_net))
    .bind(columns::text(b.standard_vat))
    .bind(columns::text(b.reduced_net))
    .bind(columns::text(b.reduced_vat))
    .bind(columns::text(b.second_reduced_net))
    .bind(columns::text(b.second_reduced_vat))
    .bind(columns::text(b.zero_net))
    .bind(columns::text(b.zero_vat))
    .bind(columns::text(invoice.subtotal))
    .bind(columns::text(invoice.vat_amount))
    .bind(columns::text(invoice.total_amount))
    .bind(invoice.payment_status)
    .bind(invoice.payment_date)
    .bind(&invoice.payment_method)
    .bind(&invoice.payment_reference)
    .bind(&invoice.expense_category)
    .bind(&invoice.notes)
    .bind(&invoice.external_id)
    .bind(&invoice.vat_return_id)
    .bind(invoice.created_at)
    .bind(invoice.updated_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Updates every field except the identity and the return assignment.
async fn update_row(tx: &mut Transaction<'_, Sqlite>, invoice: &Invoice) -> DbResult<()> {
    let b = &invoice.buckets;
    let result = sqlx::query(
        r#"
        UPDATE invoices SET
            invoice_number = ?2, supplier_id = ?3, supplier_name = ?4,
            invoice_date = ?5, due_date = ?6,
            standard_net = ?7, standard_vat = ?8, reduced_net = ?9, reduced_vat = ?10,
            second_reduced_net = ?11, second_reduced_vat = ?12, zero_net = ?13, zero_vat = ?14,
            subtotal = ?15, vat_amount = ?16, total_amount = ?17,
            payment_status = ?18, payment_date = ?19, payment_method = ?20,
            payment_reference = ?21, expense_category = ?22, notes = ?23,
            updated_at = ?24
        WHERE id = ?1
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.invoice_number)
    .bind(&invoice.supplier_id)
    .bind(&invoice.supplier_name)
    .bind(invoice.invoice_date)
    .bind(invoice.due_date)
    .bind(columns::text(b.standard_net))
    .bind(columns::text(b.standard_vat))
    .bind(columns::text(b.reduced_net))
    .bind(columns::text(b.reduced_vat))
    .bind(columns::text(b.second_reduced_net))
    .bind(columns::text(b.second_reduced_vat))
    .bind(columns::text(b.zero_net))
    .bind(columns::text(b.zero_vat))
    .bind(columns::text(invoice.subtotal))
    .bind(columns::text(invoice.vat_amount))
    .bind(columns::text(invoice.total_amount))
    .bind(invoice.payment_status)
    .bind(invoice.payment_date)
    .bind(&invoice.payment_method)
    .bind(&invoice.payment_reference)
    .bind(&invoice.expense_category)
    .bind(&invoice.notes)
    .bind(invoice.updated_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Invoice", invoice.id.clone()));
    }
    Ok(())
}

async fn replace_lines(
    tx: &mut Transaction<'_, Sqlite>,
    invoice_id: &str,
    lines: &[InvoiceLine],
) -> DbResult<()> {
    sqlx::query("DELETE FROM invoice_vat_lines WHERE invoice_id = ?1")
        .bind(invoice_id)
        .execute(&mut **tx)
        .await?;

    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO invoice_vat_lines
                (invoice_id, line_number, vat_category, net, vat_rate, vat, gross)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(invoice_id)
        .bind(line.line_number)
        .bind(line.vat_category)
        .bind(columns::text(line.net))
        .bind(line.vat_rate.to_string())
        .bind(columns::text(line.vat))
        .bind(columns::text(line.gross))
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

// =============================================================================
// Row Mapping
// =============================================================================

pub(crate) fn buckets_from_row(row: &SqliteRow) -> DbResult<VatBuckets> {
    Ok(VatBuckets {
        standard_net: columns::money(row, "standard_net")?,
        standard_vat: columns::money(row, "standard_vat")?,
        reduced_net: columns::money(row, "reduced_net")?,
        reduced_vat: columns::money(row, "reduced_vat")?,
        second_reduced_net: columns::money(row, "second_reduced_net")?,
        second_reduced_vat: columns::money(row, "second_reduced_vat")?,
        zero_net: columns::money(row, "zero_net")?,
        zero_vat: columns::money(row, "zero_vat")?,
    })
}

pub(crate) fn invoice_from_row(row: &SqliteRow) -> DbResult<Invoice> {
    Ok(Invoice {
        id: row.try_get("id")?,
        invoice_number: row.try_get("invoice_number")?,
        supplier_id: row.try_get("supplier_id")?,
        supplier_name: row.try_get("supplier_name")?,
        invoice_date: row.try_get("invoice_date")?,
        due_date: row.try_get("due_date")?,
        buckets: buckets_from_row(row)?,
        subtotal: columns::money(row, "subtotal")?,
        vat_amount: columns::money(row, "vat_amount")?,
        total_amount: columns::money(row, "total_amount")?,
        payment_status: row.try_get("payment_status")?,
        payment_date: row.try_get("payment_date")?,
        payment_method: row.try_get("payment_method")?,
        payment_reference: row.try_get("payment_reference")?,
        expense_category: row.try_get("expense_category")?,
        notes: row.try_get("notes")?,
        external_id: row.try_get("external_id")?,
        vat_return_id: row.try_get("vat_return_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn line_from_row(row: &SqliteRow) -> DbResult<InvoiceLine> {
    Ok(InvoiceLine {
        line_number: row.try_get("line_number")?,
        vat_category: row.try_get("vat_category")?,
        net: columns::money(row, "net")?,
        vat_rate: columns::decimal(row, "vat_rate")?,
        vat: columns::money(row, "vat")?,
        gross: columns::money(row, "gross")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_invoice, seeded_db};
    use crate::Database;
    use backoffice_core::vat_return::NewVatReturn;
    use rust_decimal::Decimal;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn money(s: &str) -> Money {
        s.parse().unwrap()
    }

    async fn create(db: &Database, new: &NewInvoice) -> Invoice {
        let rates = db.vat_rates().load().await.unwrap();
        db.invoices().create(new, &rates, &db.suppliers()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_derives_totals_from_lines() {
        let db = seeded_db().await;
        let invoice = create(&db, &new_invoice("INV-1", date(2025, 3, 5))).await;

        assert_eq!(invoice.buckets.standard_net, money("150.00"));
        assert_eq!(invoice.buckets.standard_vat, money("34.50"));
        assert_eq!(invoice.buckets.reduced_net, money("20.00"));
        assert_eq!(invoice.buckets.reduced_vat, money("2.70"));
        assert_eq!(invoice.subtotal, money("170.00"));
        assert_eq!(invoice.vat_amount, money("37.20"));
        assert_eq!(invoice.total_amount, money("207.20"));

        let stored = db.invoices().get(&invoice.id).await.unwrap();
        assert_eq!(stored.total_amount, money("207.20"));
        assert!(stored.check_totals().is_ok());

        let lines = db.invoices().lines(&invoice.id).await.unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line_number, 1);
        assert_eq!(lines[0].vat_rate, "0.23".parse::<Decimal>().unwrap());
        assert_eq!(lines[2].vat, money("2.70"));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input_without_writing() {
        let db = seeded_db().await;
        let mut new = new_invoice("INV-1", date(2025, 3, 5));
        new.lines.clear();

        let rates = db.vat_rates().load().await.unwrap();
        let err = db
            .invoices()
            .create(&new, &rates, &db.suppliers())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));
        assert!(db.invoices().list_unassigned().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_external_updates_in_place() {
        let db = seeded_db().await;
        let rates = db.vat_rates().load().await.unwrap();
        let mut new = new_invoice("EXT-1", date(2025, 3, 5));
        new.external_id = Some("xero-42".to_string());

        let first = db
            .invoices()
            .upsert_external(&new, &rates, &db.suppliers())
            .await
            .unwrap();

        new.lines.truncate(1);
        let second = db
            .invoices()
            .upsert_external(&new, &rates, &db.suppliers())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.subtotal, money("100.00"));
        assert_eq!(db.invoices().lines(&first.id).await.unwrap().len(), 1);
        assert_eq!(db.invoices().list_unassigned().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_external_requires_external_id() {
        let db = seeded_db().await;
        let rates = db.vat_rates().load().await.unwrap();
        let new = new_invoice("EXT-1", date(2025, 3, 5));

        let err = db
            .invoices()
            .upsert_external(&new, &rates, &db.suppliers())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::Validation(ValidationError::RequiredWhen { .. }))
        ));
    }

    #[tokio::test]
    async fn test_line_edit_uses_owner_at_write_time() {
        let db = seeded_db().await;
        let rates = db.vat_rates().load().await.unwrap();
        let invoice = create(&db, &new_invoice("INV-1", date(2025, 3, 5))).await;

        // Read while unassigned, then claimed before the write.
        let stale = db.invoices().get(&invoice.id).await.unwrap();
        assert!(stale.vat_return_id.is_none());
        let returns = db.vat_returns();
        let vat_return = returns
            .create_draft(&NewVatReturn {
                return_period: "2025-03".to_string(),
                period_end: date(2025, 3, 31),
                invoice_ids: vec![invoice.id.clone()],
                notes: None,
                is_historical: false,
                created_by: None,
            })
            .await
            .unwrap();

        let inputs = new_invoice("INV-1", date(2025, 3, 5)).lines;
        let edit = |inputs: &[InvoiceLineInput]| {
            let lines = build_lines(inputs, &rates, stale.invoice_date).unwrap();
            let mut edited = stale.clone();
            edited.apply_buckets(classify_into_buckets(&lines));
            (edited, lines)
        };

        let (edited, lines) = edit(&inputs[..1]);
        let saved = db.invoices().save_lines(edited, &lines).await.unwrap();
        assert_eq!(saved.vat_return_id.as_deref(), Some(vat_return.id.as_str()));
        let draft = returns.get(&vat_return.id).await.unwrap();
        assert_eq!(draft.totals.total_vat, money("23.00"));

        returns.finalize(&vat_return.id, None).await.unwrap();
        let (edited, lines) = edit(&inputs[..]);
        let err = db.invoices().save_lines(edited, &lines).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Core(CoreError::ImmutableReturn { ref return_id, .. }) if *return_id == vat_return.id
        ));

        let stored = db.invoices().get(&invoice.id).await.unwrap();
        assert_eq!(stored.total_amount, money("123.00"));
        assert_eq!(db.invoices().lines(&invoice.id).await.unwrap().len(), 1);
        assert_eq!(returns.get(&vat_return.id).await.unwrap().totals, draft.totals);
    }

    #[tokio::test]
    async fn test_paid_status_needs_payment_date() {
        let db = seeded_db().await;
        let invoice = create(&db, &new_invoice("INV-1", date(2025, 3, 5))).await;

        let err = db
            .invoices()
            .set_payment_status(&invoice.id, PaymentStatus::Paid, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Core(CoreError::Validation(_))));

        let paid = db
            .invoices()
            .set_payment_status(&invoice.id, PaymentStatus::Paid, Some(date(2025, 3, 20)))
            .await
            .unwrap();
        assert_eq!(paid.payment_status, PaymentStatus::Paid);
        assert_eq!(
            db.invoices().get(&invoice.id).await.unwrap().payment_date,
            Some(date(2025, 3, 20))
        );
    }

    #[tokio::test]
    async fn test_refresh_overdue_only_moves_pending_past_due() {
        let db = seeded_db().await;
        let mut late = new_invoice("INV-1", date(2025, 3, 1));
        late.due_date = Some(date(2025, 3, 31));
        let mut current = new_invoice("INV-2", date(2025, 3, 1));
        current.due_date = Some(date(2025, 4, 30));
        let late = create(&db, &late).await;
        let current = create(&db, &current).await;

        let changed = db.invoices().refresh_overdue(date(2025, 4, 10)).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            db.invoices().get(&late.id).await.unwrap().payment_status,
            PaymentStatus::Overdue
        );
        assert_eq!(
            db.invoices().get(&current.id).await.unwrap().payment_status,
            PaymentStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_cost_summary_and_unsubmitted() {
        let db = seeded_db().await;
        let a = create(&db, &new_invoice("INV-1", date(2025, 3, 5))).await;
        create(&db, &new_invoice("INV-2", date(2025, 4, 5))).await;
        db.invoices()
            .set_payment_status(&a.id, PaymentStatus::Paid, Some(date(2025, 3, 6)))
            .await
            .unwrap();

        let march = DateRange::new(date(2025, 3, 1), date(2025, 3, 31)).unwrap();
        let costs = db.invoices().cost_summary(march).await.unwrap();
        assert_eq!(costs.invoice_count, 1);
        assert_eq!(costs.paid_net, money("170.00"));
        assert_eq!(costs.pending_count, 0);

        let unsubmitted = db.invoices().unsubmitted_summary().await.unwrap();
        assert_eq!(unsubmitted.count, 2);
        assert_eq!(unsubmitted.total_vat, money("74.40"));
        assert_eq!(unsubmitted.earliest_date, Some(date(2025, 3, 5)));
        assert_eq!(
            db.invoices().unassigned_dates().await.unwrap(),
            vec![date(2025, 3, 5), date(2025, 4, 5)]
        );
    }

    #[tokio::test]
    async fn test_get_unknown_invoice_is_not_found() {
        let db = seeded_db().await;
        let err = db.invoices().get("missing").await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
