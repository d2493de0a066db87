//! # Supplier Repository
//!
//! Turns a supplier name as written on an invoice into a stable supplier
//! identity. Invoice creation only sees the [`SupplierResolver`] trait.

use async_trait::async_trait;
use backoffice_core::validation::validate_required;
use chrono::Utc;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::DbResult;

/// A resolved supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supplier {
    pub id: String,
    pub name: String,
}

/// Resolves supplier names to identities.
#[async_trait]
pub trait SupplierResolver: Send + Sync {
    /// Returns the supplier matching `name`, creating it if unknown.
    async fn resolve(&self, name: &str) -> DbResult<Supplier>;
}

/// Repository for suppliers.
///
/// Names match case-insensitively and ignore surrounding whitespace, so
/// "ACME Ltd" and " acme ltd" resolve to the same supplier.
#[derive(Debug, Clone)]
pub struct SupplierRepository {
    pool: SqlitePool,
}

impl SupplierRepository {
    /// Creates a new SupplierRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SupplierRepository { pool }
    }

    /// Finds a supplier by name.
    pub async fn find_by_name(&self, name: &str) -> DbResult<Option<Supplier>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, name FROM suppliers WHERE name = ?1 COLLATE NOCASE")
                .bind(name.trim())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id, name)| Supplier { id, name }))
    }

    /// All suppliers, by name.
    pub async fn list(&self) -> DbResult<Vec<Supplier>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, name FROM suppliers ORDER BY name COLLATE NOCASE")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id, name)| Supplier { id, name }).collect())
    }

    async fn resolve_in(tx: &mut Transaction<'_, Sqlite>, name: &str) -> DbResult<Supplier> {
        let name = validate_required("supplier_name", name, 255)?;

        // Insert-if-missing keeps two concurrent resolves from creating twins
        sqlx::query(
            r#"
            INSERT INTO suppliers (id, name, created_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&name)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

        let (id, stored): (String, String) =
            sqlx::query_as("SELECT id, name FROM suppliers WHERE name = ?1 COLLATE NOCASE")
                .bind(&name)
                .fetch_one(&mut **tx)
                .await?;

        Ok(Supplier { id, name: stored })
    }
}

#[async_trait]
impl SupplierResolver for SupplierRepository {
    async fn resolve(&self, name: &str) -> DbResult<Supplier> {
        let mut tx = self.pool.begin().await?;
        let supplier = Self::resolve_in(&mut tx, name).await?;
        tx.commit().await?;

        info!(supplier_id = %supplier.id, name = %supplier.name, "Resolved supplier");
        Ok(supplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_resolve_matches_case_insensitively() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let suppliers = db.suppliers();

        let first = suppliers.resolve("Acme Ltd").await.unwrap();
        let second = suppliers.resolve("  ACME LTD ").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Acme Ltd");
        assert_eq!(suppliers.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_creates_unknown_supplier() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let suppliers = db.suppliers();

        assert!(suppliers.find_by_name("Milk Co").await.unwrap().is_none());
        let created = suppliers.resolve("Milk Co").await.unwrap();
        assert_eq!(
            suppliers.find_by_name("milk co").await.unwrap(),
            Some(created)
        );
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.suppliers().resolve("   ").await.is_err());
    }
}
