//! Decoding helpers for TEXT-encoded decimal columns.

use backoffice_core::Money;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use crate::error::{DbError, DbResult};

/// Parses a decimal string as written by this crate or by SQLite's
/// `CAST(real AS TEXT)`, which may use exponent notation.
pub(crate) fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

pub(crate) fn decimal(row: &SqliteRow, column: &str) -> DbResult<Decimal> {
    let raw: String = row.try_get(column)?;
    parse_decimal(&raw).ok_or_else(|| DbError::decode(column, raw))
}

pub(crate) fn money(row: &SqliteRow, column: &str) -> DbResult<Money> {
    decimal(row, column).map(Money::new)
}

/// Full-precision text for storage.
pub(crate) fn text(amount: Money) -> String {
    amount.amount().to_string()
}
