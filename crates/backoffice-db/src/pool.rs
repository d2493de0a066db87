//! # Connection Pools
//!
//! The back office talks to two SQLite files:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   backoffice.db                          POS database                   │
//! │   ─────────────                          ────────────                   │
//! │   DbConfig::new(path)                    DbConfig::pos(path)            │
//! │   Access::ReadWrite                      Access::ReadOnly               │
//! │   WAL, foreign keys, migrated            never migrated, never written  │
//! │        │                                      │                         │
//! │        ▼                                      ▼                         │
//! │   Database ── repositories             SqlitePosSource                  │
//! │   (invoices, vat_returns,              (TransactionSource)              │
//! │    reconciliations, ...)                                                │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both go through [`connect`]; only [`Database::new`] runs migrations.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::invoice::InvoiceRepository;
use crate::repository::reconciliation::ReconciliationRepository;
use crate::repository::sales_aggregate::SalesAggregateRepository;
use crate::repository::supplier::SupplierRepository;
use crate::repository::vat_rate::VatRateRepository;
use crate::repository::vat_return::VatReturnRepository;

// =============================================================================
// Configuration
// =============================================================================

/// How a database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Owned by the back office: created if missing, WAL journal.
    ReadWrite,
    /// Someone else's file. Must already exist.
    ReadOnly,
}

/// Pool settings for one SQLite file.
///
/// ```rust,ignore
/// let owned = DbConfig::new("/srv/backoffice.db").max_connections(8);
/// let pos = DbConfig::pos("/srv/unicenta.db");
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    pub access: Access,

    /// Default: 5
    pub max_connections: u32,

    /// How long to wait for a free connection. Default: 30 seconds
    pub acquire_timeout: Duration,

    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Apply the embedded migrations on [`Database::new`].
    pub migrate: bool,
}

impl DbConfig {
    /// The back office's own database, created on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            path: path.into(),
            access: Access::ReadWrite,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            migrate: true,
        }
    }

    /// The POS database: read-only and never migrated.
    pub fn pos(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            access: Access::ReadOnly,
            migrate: false,
            ..DbConfig::new(path)
        }
    }

    /// A private in-memory database for tests.
    ///
    /// Each connection to `:memory:` sees its own empty database, so the
    /// pool is capped at one connection.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            ..DbConfig::new(":memory:")
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let read_only = self.access == Access::ReadOnly;
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(!read_only)
            .read_only(read_only)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal);

        // Changing the journal mode writes to the file header
        if read_only {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        }
    }
}

/// Opens a pool for `config`. Migrations are left to the caller.
pub async fn connect(config: &DbConfig) -> DbResult<SqlitePool> {
    debug!(
        path = %config.path.display(),
        access = ?config.access,
        max_connections = config.max_connections,
        "Opening SQLite pool"
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .connect_with(config.connect_options())
        .await
        .map_err(|e| {
            DbError::ConnectionFailed(format!("{}: {}", config.path.display(), e))
        })?;

    info!(path = %config.path.display(), access = ?config.access, "SQLite pool ready");
    Ok(pool)
}

// =============================================================================
// Database
// =============================================================================

/// Handle on the back office database.
///
/// Cloning is cheap; every repository it hands out shares the same pool.
///
/// ```rust,ignore
/// let db = Database::new(DbConfig::new("./backoffice.db")).await?;
/// let draft = db.vat_returns().create_draft(&new_return).await?;
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and, unless disabled, brings the schema up to date.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        if config.access == Access::ReadOnly {
            return Err(DbError::ConnectionFailed(format!(
                "{} is read-only; the back office database must be writable",
                config.path.display()
            )));
        }

        let db = Database {
            pool: connect(&config).await?,
        };
        if config.migrate {
            migrations::run_migrations(&db.pool).await?;
        }
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn vat_rates(&self) -> VatRateRepository {
        VatRateRepository::new(self.pool.clone())
    }

    /// Rows written by the sales import.
    pub fn sales_aggregates(&self) -> SalesAggregateRepository {
        SalesAggregateRepository::new(self.pool.clone())
    }

    pub fn reconciliations(&self) -> ReconciliationRepository {
        ReconciliationRepository::new(self.pool.clone())
    }

    /// Also the default [`SupplierResolver`](crate::SupplierResolver).
    pub fn suppliers(&self) -> SupplierRepository {
        SupplierRepository::new(self.pool.clone())
    }

    pub fn invoices(&self) -> InvoiceRepository {
        InvoiceRepository::new(self.pool.clone())
    }

    pub fn vat_returns(&self) -> VatReturnRepository {
        VatReturnRepository::new(self.pool.clone())
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        info!("Closing back office database");
        self.pool.close().await;
    }

    /// True when a trivial query succeeds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
