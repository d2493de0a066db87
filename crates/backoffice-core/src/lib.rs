//! # backoffice-core: Pure Accounting Logic for the Back Office
//!
//! This crate holds every accounting rule of the back office as pure
//! functions over plain data. Nothing here touches a database, a file or
//! the wall clock.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Back Office Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌──────────────────────────────────┐  │
//! │  │  POS database (RO)   │        │  Back office database (owned)    │  │
//! │  │  RECEIPTS, PAYMENTS, │        │  vat_rates, sales_aggregate_*,   │  │
//! │  │  TICKETLINES, TAXES  │        │  cash_reconciliations, invoices, │  │
//! │  └──────────┬───────────┘        │  vat_returns                     │  │
//! │             │                    └───────────────┬──────────────────┘  │
//! │             └──────────────┬─────────────────────┘                     │
//! │                            │  backoffice-db (sqlx)                      │
//! │  ┌─────────────────────────▼───────────────────────────────────────┐   │
//! │  │              ★ backoffice-core (THIS CRATE) ★                    │   │
//! │  │                                                                  │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────────┐ ┌────────────────┐  │   │
//! │  │  │ vat_rate │ │  sales   │ │reconciliation│ │ invoice        │  │   │
//! │  │  │ table    │ │ classify │ │ cash count   │ │ VAT buckets    │  │   │
//! │  │  └──────────┘ └──────────┘ └──────────────┘ └────────────────┘  │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────────┐                     │   │
//! │  │  │vat_return│ │ calendar │ │  reporting   │                     │   │
//! │  │  │ states   │ │ periods  │ │ P&L, alerts  │                     │   │
//! │  │  └──────────┘ └──────────┘ └──────────────┘                     │   │
//! │  │                                                                  │   │
//! │  │   NO I/O • NO DATABASE • NO WALL CLOCK • PURE FUNCTIONS          │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Decimal `Money` type with half-up presentation rounding
//! - [`vat_rate`] - Time-versioned VAT rate table
//! - [`sales`] - Transaction line classification and daily aggregation
//! - [`reconciliation`] - Till cash counts, floats and variance
//! - [`invoice`] - Purchase invoices and their VAT buckets
//! - [`vat_return`] - VAT return lifecycle rules and ROS figures
//! - [`calendar`] - Bi-monthly filing calendar and outstanding periods
//! - [`reporting`] - Profit & loss, alerts and CSV rendering
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation helpers
//!
//! ## Example Usage
//!
//! ```rust
//! use backoffice_core::vat_rate::{VatRateCode, VatRateTable};
//! use chrono::NaiveDate;
//!
//! let table = VatRateTable::irish_defaults();
//! let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let rate = table.rate_for(VatRateCode::Reduced, date).unwrap();
//! assert_eq!(rate.to_string(), "0.135");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod calendar;
pub mod error;
pub mod invoice;
pub mod money;
pub mod reconciliation;
pub mod reporting;
pub mod sales;
pub mod types;
pub mod validation;
pub mod vat_rate;
pub mod vat_return;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::DateRange;
pub use vat_rate::{VatRateCode, VatRateTable};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// POS customer names that mark a ticket as an internal stock transfer.
///
/// Matched case-sensitively against the ticket's customer name.
pub const TRANSFER_DEPARTMENTS: [&str; 2] = ["Kitchen", "Coffee"];

/// Payment type recorded by the POS for gift voucher redemptions.
pub const VOUCHER_PAYMENT_TYPE: &str = "paperin";
