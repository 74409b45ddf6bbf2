//! SQLite-backed extension registry using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Error, Result,
    error::Context,
    manifest::ExtensionRecord,
    registry::ExtensionRegistry,
};

/// One row per extension id; the record itself is stored as JSON.
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    /// Open a dedicated pool and run migrations.
    ///
    /// For a shared database use [`SqliteRegistry::with_pool`] after calling
    /// [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to SQLite")?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Use an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExtensionRegistry for SqliteRegistry {
    async fn list(&self) -> Result<Vec<ExtensionRecord>> {
        let rows = sqlx::query("SELECT data, enabled FROM extensions")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(decode(&row)?);
        }
        Ok(records)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRecord>> {
        let row = sqlx::query("SELECT data, enabled FROM extensions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn upsert(&self, record: &ExtensionRecord) -> Result<()> {
        let data = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO extensions (id, data, enabled, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                data = excluded.data,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&data)
        .bind(record.enabled)
        .bind(jamra_common::now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let result = sqlx::query("UPDATE extensions SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(jamra_common::now_ms() as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::validation(format!("extension {id} not found")));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM extensions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// The `enabled` column is authoritative; `set_enabled` does not rewrite
/// the JSON blob.
fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<ExtensionRecord> {
    let data: String = row.get("data");
    let mut record: ExtensionRecord = serde_json::from_str(&data)?;
    record.enabled = row.get::<bool, _>("enabled");
    Ok(record)
}
