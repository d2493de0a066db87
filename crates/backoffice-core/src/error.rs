//! # Error Types
//!
//! Domain-specific error types for backoffice-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  backoffice-core errors (this file)                                    │
//! │  ├── CoreError        - Accounting rule violations                     │
//! │  └── ValidationError  - Malformed input caught before persistence      │
//! │                                                                         │
//! │  backoffice-db errors (separate crate)                                 │
//! │  └── DbError          - Database failures, wraps CoreError             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant is returned to the caller of the public operation that
//! raised it. Nothing is logged-and-continued.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::vat_rate::VatRateCode;
use crate::vat_return::VatReturnStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Accounting rule violations and collaborator failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No VAT rate range covers the requested date.
    ///
    /// ## When This Occurs
    /// - Looking up a rate for a date before the first seeded range
    /// - A range was closed and no successor was inserted
    ///
    /// Callers must never substitute a default rate for this error.
    #[error("No {code} VAT rate is effective on {date}")]
    NoApplicableRate { code: VatRateCode, date: NaiveDate },

    /// A raw POS tax rate matches none of the rate codes effective that day.
    ///
    /// ## When This Occurs
    /// - The POS TAXES table carries a rate the back office has never seeded
    /// - A rate change was applied in the POS before the rate table
    #[error("POS tax rate {rate} on {date} does not match any VAT rate code")]
    UnrecognizedRate { rate: Decimal, date: NaiveDate },

    /// An upstream source (POS database, invoice import) failed or returned
    /// malformed data.
    ///
    /// An empty but successful range is never reported through this variant.
    #[error("Data source '{source_name}' failed: {message}")]
    DataSource { source_name: String, message: String },

    /// Referenced reconciliation, invoice or VAT return does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Mutation attempted on a VAT return that is no longer a draft.
    ///
    /// ## When This Occurs
    /// - Adding or removing invoices after finalize
    /// - Recalculating totals after finalize
    /// - Deleting a finalized return
    #[error("VAT return {return_id} is {status} and can no longer be changed")]
    ImmutableReturn {
        return_id: String,
        status: VatReturnStatus,
    },

    /// Invoice is not owned by the VAT return named in the request.
    #[error("Invoice {invoice_id} does not belong to VAT return {return_id}")]
    Ownership {
        invoice_id: String,
        return_id: String,
    },

    /// The atomic invoice claim matched fewer rows than requested.
    ///
    /// ## User Workflow
    /// ```text
    /// createDraft(ids = [A, B, C])
    ///      │
    ///      ▼
    /// UPDATE invoices SET vat_return_id = ? WHERE id IN (A,B,C)
    ///                                       AND vat_return_id IS NULL
    ///      │
    ///      ▼
    /// rows_affected = 2  (B was claimed by a concurrent draft)
    ///      │
    ///      ▼
    /// AssignmentConflict { requested: 3, claimed: 2 } → whole draft rolled back
    /// ```
    #[error("Claimed {claimed} of {requested} invoices; the rest are missing or already assigned")]
    AssignmentConflict { requested: usize, claimed: u64 },

    /// A VAT return with the same period label already exists.
    #[error("A VAT return for period '{0}' already exists")]
    DuplicatePeriod(String),

    /// Finalize attempted on a return that owns no invoices.
    #[error("VAT return {0} has no invoices and cannot be finalized")]
    EmptyReturn(String),

    /// Stored totals disagree with the sum of their VAT buckets.
    #[error("{entity} totals do not match their VAT buckets: {detail}")]
    TotalsMismatch { entity: String, detail: String },

    /// Administrative status change outside the allowed path.
    #[error("Cannot move VAT return from {from} to {to}")]
    InvalidTransition {
        from: VatReturnStatus,
        to: VatReturnStatus,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a DataSource error.
    pub fn data_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::DataSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any persistence so that a save never partially commits.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Count or amount is below zero.
    #[error("{field} must not be negative")]
    Negative { field: String },

    /// Value is outside its allowed range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: String,
        min: String,
        max: String,
    },

    /// Invalid format (e.g., unparseable amount, unknown code).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// End of a date range precedes its start.
    #[error("end date {end} is before start date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    /// A date-dependent field is missing for the requested state.
    #[error("{field} is required when {condition}")]
    RequiredWhen { field: String, condition: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::AssignmentConflict {
            requested: 3,
            claimed: 2,
        };
        assert_eq!(
            err.to_string(),
            "Claimed 2 of 3 invoices; the rest are missing or already assigned"
        );

        let err = CoreError::NoApplicableRate {
            code: VatRateCode::Standard,
            date: NaiveDate::from_ymd_opt(2010, 5, 1).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "No STANDARD VAT rate is effective on 2010-05-01"
        );
    }

    #[test]
    fn test_immutable_return_message() {
        let err = CoreError::ImmutableReturn {
            return_id: "r-1".to_string(),
            status: VatReturnStatus::Finalized,
        };
        assert_eq!(
            err.to_string(),
            "VAT return r-1 is finalized and can no longer be changed"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Negative {
            field: "cash_50".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
