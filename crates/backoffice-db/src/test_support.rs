//! Test fixtures shared by the repository, aggregation and report tests.

use backoffice_core::invoice::{InvoiceLineInput, NewInvoice, PaymentStatus};
use backoffice_core::{Money, VatRateCode};
use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::pool::{self, Database, DbConfig};

const POS_SCHEMA: &str = include_str!("../fixtures/pos_schema.sql");

/// Back office database with the default VAT rates seeded.
pub(crate) async fn seeded_db() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    db.vat_rates().seed_defaults().await.unwrap();
    db
}

/// Empty in-memory POS database with the fixture schema loaded.
pub(crate) async fn pos_fixture() -> SqlitePool {
    let pool = pool::connect(&DbConfig::in_memory().migrate(false))
        .await
        .unwrap();
    sqlx::raw_sql(POS_SCHEMA).execute(&pool).await.unwrap();
    pool
}

/// Pending invoice from "Acme Ltd": 150.00 standard plus 20.00 reduced,
/// which totals 170.00 net, 37.20 VAT and 207.20 gross.
pub(crate) fn new_invoice(number: &str, day: NaiveDate) -> NewInvoice {
    let line = |code, net: &str| InvoiceLineInput {
        vat_category: code,
        net: net.parse::<Money>().unwrap(),
        vat_rate: None,
    };

    NewInvoice {
        invoice_number: number.to_string(),
        supplier_name: "Acme Ltd".to_string(),
        invoice_date: day,
        due_date: None,
        lines: vec![
            line(VatRateCode::Standard, "100.00"),
            line(VatRateCode::Standard, "50.00"),
            line(VatRateCode::Reduced, "20.00"),
        ],
        payment_status: PaymentStatus::Pending,
        payment_date: None,
        payment_method: None,
        payment_reference: None,
        expense_category: None,
        notes: None,
        external_id: None,
    }
}

/// Builder for one POS receipt, taken on "Till 1".
pub(crate) struct PosSale {
    receipt_id: String,
    date: NaiveDate,
    customer: Option<String>,
    lines: Vec<(String, String, String)>,
    payments: Vec<(String, String)>,
}

impl PosSale {
    pub(crate) fn new(receipt_id: &str, date: NaiveDate) -> Self {
        PosSale {
            receipt_id: receipt_id.to_string(),
            date,
            customer: None,
            lines: Vec::new(),
            payments: Vec::new(),
        }
    }

    pub(crate) fn customer(mut self, customer_id: &str) -> Self {
        self.customer = Some(customer_id.to_string());
        self
    }

    pub(crate) fn line(mut self, price: &str, units: &str, tax_id: &str) -> Self {
        self.lines
            .push((price.to_string(), units.to_string(), tax_id.to_string()));
        self
    }

    pub(crate) fn payment(mut self, payment: &str, total: &str) -> Self {
        self.payments.push((payment.to_string(), total.to_string()));
        self
    }

    pub(crate) async fn insert(self, pool: &SqlitePool) {
        let day = self.date.format("%Y-%m-%d").to_string();
        let money = format!("money-{}", day);

        sqlx::query(
            "INSERT OR IGNORE INTO CLOSEDCASH (MONEY, HOST, DATESTART, DATEEND) VALUES (?1, 'Till 1', ?2, ?3)",
        )
        .bind(&money)
        .bind(format!("{} 08:00:00", day))
        .bind(format!("{} 22:00:00", day))
        .execute(pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO RECEIPTS (ID, MONEY, DATENEW) VALUES (?1, ?2, ?3)")
            .bind(&self.receipt_id)
            .bind(&money)
            .bind(format!("{} 12:00:00", day))
            .execute(pool)
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO TICKETS (ID, TICKETID, CUSTOMER) VALUES (?1, (SELECT COUNT(*) + 1 FROM TICKETS), ?2)",
        )
        .bind(&self.receipt_id)
        .bind(&self.customer)
        .execute(pool)
        .await
        .unwrap();

        for (index, (price, units, tax_id)) in self.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO TICKETLINES (TICKET, LINE, UNITS, PRICE, TAXID) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&self.receipt_id)
            .bind(index as i64)
            .bind(units)
            .bind(price)
            .bind(tax_id)
            .execute(pool)
            .await
            .unwrap();
        }

        for (index, (payment, total)) in self.payments.iter().enumerate() {
            sqlx::query("INSERT INTO PAYMENTS (ID, RECEIPT, PAYMENT, TOTAL) VALUES (?1, ?2, ?3, ?4)")
                .bind(format!("{}-p{}", self.receipt_id, index))
                .bind(&self.receipt_id)
                .bind(payment)
                .bind(total)
                .execute(pool)
                .await
                .unwrap();
        }
    }
}
