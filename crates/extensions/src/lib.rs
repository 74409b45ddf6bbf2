//! Extension host: manifest and record model, source loader, registry,
//! sandboxed runtime, local bootstrap and development hot reload.

pub mod bootstrap;
pub mod error;
pub mod host;
pub mod loader;
pub mod manifest;
pub mod network;
pub mod registry;
pub mod registry_memory;
pub mod registry_sqlite;
pub mod runtime;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use {
    error::{Error, ErrorKind, Result},
    host::ExtensionHost,
};

/// Run database migrations for the extension registry.
///
/// Creates the `extensions` table. Call at startup when using
/// [`registry_sqlite::SqliteRegistry::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
