//! # Schema Migrations
//!
//! The back office schema lives in `migrations/sqlite/` at the workspace
//! root and is compiled into the binary with `sqlx::migrate!`.
//!
//! | File | Adds |
//! |------|------|
//! | `001_initial_schema.sql` | rates, daily sales and transfers, reconciliations with payments and notes, suppliers, invoices with VAT lines, VAT returns |
//! | `002_sales_receipt_daily.sql` | distinct sales receipts per day |
//!
//! Applied files are recorded in `_sqlx_migrations` with their checksum, so an
//! edited file fails the next start. Add a new numbered file instead.
//!
//! The POS database is never passed through here.

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::DbResult;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Applies every migration not yet recorded. Safe to call on each start.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    let (total, applied) = migration_status(pool).await?;
    if applied >= total {
        debug!(total, "Schema is current");
        return Ok(());
    }

    MIGRATOR.run(pool).await?;
    info!(applied = total - applied, total, "Applied schema migrations");
    Ok(())
}

/// `(embedded, applied)` migration counts.
///
/// A fresh database has no `_sqlx_migrations` table yet and reports zero
/// applied.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let has_table: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;

    let applied: i64 = if has_table == 0 {
        0
    } else {
        sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?
    };

    Ok((MIGRATOR.migrations.len(), applied as usize))
}
