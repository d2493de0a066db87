//! # Seed Data Generator
//!
//! Populates the back office database with development data.
//!
//! ## Usage
//! ```bash
//! # Seed rates, 60 invoices and two weeks of reconciliations
//! cargo run -p backoffice-db --bin seed
//!
//! # Generate a custom number of invoices
//! cargo run -p backoffice-db --bin seed -- --count 200
//!
//! # Specify database path
//! cargo run -p backoffice-db --bin seed -- --db ./data/backoffice.db
//! ```
//!
//! ## Generated Data
//! - The four Irish VAT rates
//! - Invoices from a handful of suppliers, spread over the last six months,
//!   mixing standard, reduced and zero-rated lines
//! - A reconciliation per day for the last fourteen days on "Till 1"

use backoffice_core::calendar::{Clock, SystemClock};
use backoffice_core::invoice::{InvoiceLineInput, NewInvoice, PaymentStatus};
use backoffice_core::reconciliation::{
    DenominationCounts, FloatCarryForward, ReconciliationInput, SupplierPaymentInput,
};
use backoffice_core::{Money, VatRateCode};
use backoffice_db::{Database, DbConfig};
use chrono::{Days, NaiveDate};
use std::env;

const SUPPLIERS: &[&str] = &[
    "Musgrave Wholesale",
    "Glanbia Dairies",
    "Cuisine de France",
    "BWG Foods",
    "Tayto Snacks",
    "Electric Ireland",
];

/// Net amounts in cent, cycled per invoice.
const NET_CENTS: &[i64] = &[12_550, 4_820, 23_000, 8_999, 1_575, 36_410, 6_200];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 60;
    let mut db_path = String::from("./backoffice_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(60);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Back Office Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of invoices to generate (default: 60)");
                println!("  -d, --db <PATH>    Database file path (default: ./backoffice_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Back Office Seed Data Generator");
    println!("===============================");
    println!("Database: {}", db_path);
    println!("Invoices: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let seeded = db.vat_rates().seed_defaults().await?;
    println!("✓ VAT rates seeded ({} new)", seeded);

    let existing = db.invoices().list_unassigned().await?.len();
    if existing > 0 {
        println!("⚠ Database already has {} unassigned invoices", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let today = SystemClock.today();
    let rates = db.vat_rates().load().await?;
    let suppliers = db.suppliers();

    println!();
    println!("Generating invoices...");
    let start = std::time::Instant::now();
    let mut generated = 0;

    for seed in 0..count {
        let new = generate_invoice(seed, today);
        if let Err(e) = db.invoices().create(&new, &rates, &suppliers).await {
            eprintln!("Failed to insert {}: {}", new.invoice_number, e);
            continue;
        }
        generated += 1;
    }

    println!("✓ Generated {} invoices in {:?}", generated, start.elapsed());

    println!();
    println!("Generating reconciliations...");
    let repo = db.reconciliations();
    for back in (1..=14u64).rev() {
        let Some(day) = today.checked_sub_days(Days::new(back)) else {
            continue;
        };
        let draft = repo.open(day, 1, "Till 1", None).await?;
        repo.save(&draft, &generate_reconciliation(back as usize)).await?;
    }
    println!("✓ Generated 14 reconciliations");

    let summary = db.invoices().unsubmitted_summary().await?;
    println!();
    println!("Unassigned invoices: {}", summary.count);
    println!("  VAT reclaimable: {}", summary.total_vat);
    println!();
    println!("✓ Seed complete!");

    Ok(())
}

fn cents(amount: i64) -> Money {
    Money::from_cents(amount)
}

/// Generates one invoice dated within the last six months.
fn generate_invoice(seed: usize, today: NaiveDate) -> NewInvoice {
    let invoice_date = today
        .checked_sub_days(Days::new((seed * 3 % 180) as u64 + 1))
        .unwrap_or(today);
    let net = NET_CENTS[seed % NET_CENTS.len()];

    let mut lines = vec![InvoiceLineInput {
        vat_category: VatRateCode::Standard,
        net: cents(net),
        vat_rate: None,
    }];
    if seed % 3 == 0 {
        lines.push(InvoiceLineInput {
            vat_category: VatRateCode::Reduced,
            net: cents(net / 4),
            vat_rate: None,
        });
    }
    if seed % 5 == 0 {
        lines.push(InvoiceLineInput {
            vat_category: VatRateCode::Zero,
            net: cents(net / 2),
            vat_rate: None,
        });
    }

    let paid = seed % 2 == 0;
    NewInvoice {
        invoice_number: format!("INV-{:05}", seed + 1),
        supplier_name: SUPPLIERS[seed % SUPPLIERS.len()].to_string(),
        invoice_date,
        due_date: invoice_date.checked_add_days(Days::new(30)),
        lines,
        payment_status: if paid {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        },
        payment_date: paid.then_some(invoice_date),
        payment_method: paid.then(|| "bank_transfer".to_string()),
        payment_reference: None,
        expense_category: Some("stock".to_string()),
        notes: None,
        external_id: None,
    }
}

/// A plausible till count with the odd supplier paid in cash.
fn generate_reconciliation(seed: usize) -> ReconciliationInput {
    let supplier_payments = if seed % 4 == 0 {
        vec![SupplierPaymentInput {
            supplier_id: None,
            payee_name: "Window cleaner".to_string(),
            amount: cents(2_500),
            description: Some("Monthly clean".to_string()),
        }]
    } else {
        Vec::new()
    };

    ReconciliationInput {
        counts: DenominationCounts {
            cash_50: 2 + (seed % 3) as i64,
            cash_20: 10 + (seed % 7) as i64,
            cash_10: 8,
            cash_5: 6,
            cash_2: 12,
            cash_1: 15,
            cash_50c: 10,
            cash_20c: 14,
            cash_10c: 9,
        },
        floats: FloatCarryForward {
            note_float: cents(10_000),
            coin_float: cents(5_000),
        },
        supplier_payments,
        note: (seed % 5 == 0).then(|| "Counted by closing staff".to_string()),
        user: "seed".to_string(),
        ..Default::default()
    }
}
