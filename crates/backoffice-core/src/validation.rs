//! # Validation Module
//!
//! Input checks run before anything is written.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  save(reconciliation, input)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  THIS MODULE: counts ≥ 0, amounts ≥ 0, labels non-empty                │
//! │       │  any failure → ValidationError, nothing persisted               │
//! │       ▼                                                                 │
//! │  BEGIN … COMMIT (backoffice-db)                                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite: NOT NULL, UNIQUE, FOREIGN KEY                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a required free-text field and returns it trimmed.
///
/// ## Example
/// ```rust
/// use backoffice_core::validation::validate_required;
///
/// assert_eq!(validate_required("period", " 2025-03 ", 50).unwrap(), "2025-03");
/// assert!(validate_required("period", "   ", 50).is_err());
/// ```
pub fn validate_required(field: &str, value: &str, max: usize) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(value.to_string())
}

/// Validates an optional free-text field. Blank input becomes `None`.
pub fn validate_optional(
    field: &str,
    value: Option<&str>,
    max: usize,
) -> ValidationResult<Option<String>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => validate_required(field, v, max).map(Some),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a denomination or item count.
pub fn validate_count(field: &str, count: i64) -> ValidationResult<()> {
    if count < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Validates a monetary amount that must not be negative.
///
/// ## Example
/// ```rust
/// use backoffice_core::money::Money;
/// use backoffice_core::validation::validate_non_negative;
///
/// assert!(validate_non_negative("coin_float", Money::ZERO).is_ok());
/// assert!(validate_non_negative("coin_float", Money::from_cents(-1)).is_err());
/// ```
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }

    Ok(())
}

/// Parses a user-entered amount. Blank input counts as zero.
pub fn parse_amount(field: &str, raw: &str) -> ValidationResult<Money> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Money::ZERO);
    }

    raw.parse::<Money>()
        .map_err(|_| ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' is not a number", raw),
        })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required() {
        assert!(validate_required("label", "Mar-Apr", 20).is_ok());
        assert!(validate_required("label", "", 20).is_err());
        assert!(validate_required("label", &"x".repeat(21), 20).is_err());
    }

    #[test]
    fn test_validate_optional() {
        assert_eq!(validate_optional("notes", Some("  "), 10).unwrap(), None);
        assert_eq!(validate_optional("notes", None, 10).unwrap(), None);
        assert_eq!(
            validate_optional("notes", Some(" ok "), 10).unwrap(),
            Some("ok".to_string())
        );
    }

    #[test]
    fn test_validate_count() {
        assert!(validate_count("cash_50", 0).is_ok());
        assert!(validate_count("cash_50", 12).is_ok());
        assert!(matches!(
            validate_count("cash_50", -1),
            Err(ValidationError::Negative { .. })
        ));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("amount", "").unwrap(), Money::ZERO);
        assert_eq!(parse_amount("amount", "12.5").unwrap(), Money::from_cents(1250));
        assert!(matches!(
            parse_amount("amount", "twelve"),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }
}
