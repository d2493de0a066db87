//! # backoffice-db: Database Layer for the Back Office
//!
//! This crate provides database access for the back office. It owns the
//! back office's SQLite tables, reads the POS database, and wires the pure
//! rules of `backoffice-core` to both.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Back Office Data Flow                            │
//! │                                                                         │
//! │  import-sales / seed binaries, report callers                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  backoffice-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ invoices,     │    │  (embedded)  │  │   │
//! │  │   │               │    │ vat_returns,  │    │ 001_init.sql │  │   │
//! │  │   │ SqlitePool    │    │ reconciliation│    └──────────────┘  │   │
//! │  │   └───────────────┘    └───────────────┘                      │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │ pos.rs        │───►│ aggregation   │───►│ reports      │  │   │
//! │  │   │ POS reader    │    │ PreAggregated │    │ P&L, VAT     │  │   │
//! │  │   │ (read-only)   │    │ RealTime      │    │ dashboard    │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  backoffice.db (owned)               POS database (read-only)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`pos`] - Read-only POS transaction source
//! - [`aggregation`] - Pre-aggregated and real-time sales strategies, import job
//! - [`reports`] - Profit & loss, VAT dashboard, ROS figures, CSV export
//! - [`config`] - TOML + environment configuration
//! - [`telemetry`] - Tracing subscriber setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use backoffice_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/backoffice.db")).await?;
//! let rates = db.vat_rates().load().await?;
//! let invoice = db.invoices().create(&new_invoice, &rates, &db.suppliers()).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aggregation;
pub mod config;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod pos;
pub mod reports;
pub mod repository;
pub mod telemetry;

mod columns;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{BackofficeConfig, ConfigError};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::invoice::InvoiceRepository;
pub use repository::reconciliation::ReconciliationRepository;
pub use repository::sales_aggregate::SalesAggregateRepository;
pub use repository::supplier::{SupplierRepository, SupplierResolver};
pub use repository::vat_rate::VatRateRepository;
pub use repository::vat_return::VatReturnRepository;
