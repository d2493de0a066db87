//! # Repository Module
//!
//! Database repository implementations for the back office tables.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  Caller                                                                │
//! │       │                                                                 │
//! │       │  db.vat_returns().finalize(id, "alice")                        │
//! │       ▼                                                                 │
//! │  VatReturnRepository                                                   │
//! │  ├── loads the row                                                     │
//! │  ├── asks backoffice-core whether the change is allowed                │
//! │  └── writes inside one transaction                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Rules live in backoffice-core; SQL lives here.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`VatRateRepository`](vat_rate::VatRateRepository) - Rate ranges
//! - [`SalesAggregateRepository`](sales_aggregate::SalesAggregateRepository) - Daily sales rows
//! - [`ReconciliationRepository`](reconciliation::ReconciliationRepository) - Till reconciliation
//! - [`SupplierRepository`](supplier::SupplierRepository) - Supplier resolution
//! - [`InvoiceRepository`](invoice::InvoiceRepository) - Invoices and VAT lines
//! - [`VatReturnRepository`](vat_return::VatReturnRepository) - VAT return lifecycle

pub mod invoice;
pub mod reconciliation;
pub mod sales_aggregate;
pub mod supplier;
pub mod vat_rate;
pub mod vat_return;
