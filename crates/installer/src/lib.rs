//! Extension installer: repository index fetch and validation, package
//! unpacking, and the job-tracked install pipeline feeding the extension
//! registry.

pub mod error;
pub mod fetch;
pub mod index;
pub mod jobs;
pub mod jobs_memory;
pub mod jobs_sqlite;
pub mod package;
pub mod service;
pub mod source;
pub mod validate;

pub use {
    error::{Error, Result},
    index::{IndexEntry, RepositoryIndex},
    jobs::{InstallJob, InstallStage, JobStatus},
    service::{InstallRequest, InstallerService},
};

/// Run database migrations for the job store.
///
/// Creates the `install_jobs` table. Safe to run against the pool the
/// extension registry uses.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
