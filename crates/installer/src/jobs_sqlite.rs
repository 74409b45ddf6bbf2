//! SQLite-backed job store. Shares the host database pool.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool},
};

use crate::{
    Result,
    jobs::{InstallJob, JobStatus, JobStore, already_terminal, job_not_found},
};

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Use an existing pool (migrations must already be run, see
    /// [`crate::run_migrations`]).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &InstallJob) -> Result<()> {
        let now = jamra_common::now_ms() as i64;
        sqlx::query(
            "INSERT INTO install_jobs (id, status, data, requested_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(serde_json::to_string(job)?)
        .bind(job.requested_at_ms as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InstallJob>> {
        let row = sqlx::query("SELECT data FROM install_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.get("data");
                Ok(Some(serde_json::from_str(&data)?))
            },
            None => Ok(None),
        }
    }

    async fn update(&self, job: &InstallJob) -> Result<()> {
        let result = sqlx::query(
            "UPDATE install_jobs SET status = ?, data = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(job.status.as_str())
        .bind(serde_json::to_string(job)?)
        .bind(jamra_common::now_ms() as i64)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get(&job.id).await? {
            Some(stored) => Err(already_terminal(&stored.id, stored.status)),
            None => Err(job_not_found(&job.id)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, sqlx::sqlite::SqlitePoolOptions};

    async fn make_store() -> SqliteJobStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        SqliteJobStore::with_pool(pool)
    }

    #[tokio::test]
    async fn sqlite_roundtrip_and_terminal_guard() {
        let store = make_store().await;
        let mut job = InstallJob::new("github.com/acme/pack", "main", Some("demo".into()));
        store.insert(&job).await.unwrap();
        assert_eq!(store.get(&job.id).await.unwrap(), Some(job.clone()));

        job.fail("index.json not found").unwrap();
        store.update(&job).await.unwrap();

        let mut late = job.clone();
        late.status = JobStatus::Completed;
        late.error = None;
        let err = store.update(&late).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), format!("install job {} is already failed", job.id));

        let stored = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("index.json not found"));
    }

    #[tokio::test]
    async fn sqlite_unknown_job() {
        let store = make_store().await;
        assert!(store.get("missing").await.unwrap().is_none());
        let job = InstallJob::new("github.com/acme/pack", "main", None);
        assert!(store.update(&job).await.unwrap_err().is_validation());
    }
}
