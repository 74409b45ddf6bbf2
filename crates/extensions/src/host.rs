//! Service container wiring registry, loader and runtime together.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    serde_json::Value,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::info,
};

use crate::{
    bootstrap::{BootstrapReport, register_local_extensions},
    error::{Context, Error, Result},
    loader::{BundleLoader, ExtensionLoader},
    manifest::ExtensionRecord,
    network::{HttpBridge, NetworkPolicy},
    registry::ExtensionRegistry,
    registry_sqlite::SqliteRegistry,
    runtime::{ExtensionRuntime, ProcessRuntime, RuntimeOptions},
    watcher::{DevReloader, DevWatcher},
};

/// Built once per process and shared by `Arc`.
pub struct ExtensionHost {
    install_dir: PathBuf,
    development: bool,
    registry: Arc<dyn ExtensionRegistry>,
    loader: Arc<dyn ExtensionLoader>,
    runtime: Arc<dyn ExtensionRuntime>,
}

impl ExtensionHost {
    pub fn new(
        install_dir: PathBuf,
        development: bool,
        registry: Arc<dyn ExtensionRegistry>,
        loader: Arc<dyn ExtensionLoader>,
        runtime: Arc<dyn ExtensionRuntime>,
    ) -> Self {
        Self {
            install_dir,
            development,
            registry,
            loader,
            runtime,
        }
    }

    /// Standard wiring: SQLite registry on `pool` (migrated here), bundle
    /// loader and process runtime configured from `config`.
    pub async fn from_config(config: &jamra_config::JamraConfig, pool: SqlitePool) -> Result<Self> {
        crate::run_migrations(&pool).await?;
        let loader: Arc<dyn ExtensionLoader> = Arc::new(BundleLoader::new());
        let bridge = Arc::new(HttpBridge::new(NetworkPolicy::new(
            &config.sandbox.allow_network_hosts,
        ))?);
        let runtime = ProcessRuntime::new(
            Arc::clone(&loader),
            bridge,
            RuntimeOptions::from_config(&config.extensions.runtime),
        );
        Ok(Self::new(
            config.install_dir(),
            config.env.is_development(),
            Arc::new(SqliteRegistry::with_pool(pool)),
            loader,
            Arc::new(runtime),
        ))
    }

    /// Open the configured database.
    pub async fn connect_pool(database_url: &str) -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("failed to open database {database_url}"))
    }

    pub fn install_dir(&self) -> &PathBuf {
        &self.install_dir
    }

    pub fn is_development(&self) -> bool {
        self.development
    }

    pub fn registry(&self) -> &Arc<dyn ExtensionRegistry> {
        &self.registry
    }

    pub fn loader(&self) -> &Arc<dyn ExtensionLoader> {
        &self.loader
    }

    pub fn runtime(&self) -> &Arc<dyn ExtensionRuntime> {
        &self.runtime
    }

    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        register_local_extensions(&self.install_dir, self.registry.as_ref(), self.loader.as_ref())
            .await
    }

    async fn record(&self, id: &str) -> Result<ExtensionRecord> {
        self.registry
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::validation(format!("extension {id} not found")))
    }

    /// Run a lifecycle method on an enabled extension.
    pub async fn invoke(
        &self,
        id: &str,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let record = self.record(id).await?;
        if !record.enabled {
            return Err(Error::validation(format!("extension {id} is disabled")));
        }
        self.runtime.execute(&record, method, payload, timeout).await
    }

    /// Toggle an extension. Disabling also tears down its live worker.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(id, enabled).await?;
        if !enabled {
            let record = self.record(id).await?;
            self.runtime.dispose(&record).await?;
        }
        info!(extension_id = %id, enabled, "extension toggled");
        Ok(())
    }

    /// Uninstall: dispose, evict compiled code and drop the record. With
    /// `purge` the install directory is deleted too. Returns whether a
    /// record existed.
    pub async fn remove(&self, id: &str, purge: bool) -> Result<bool> {
        let Some(record) = self.registry.find_by_id(id).await? else {
            return Ok(false);
        };
        self.runtime.dispose(&record).await?;
        self.loader.unload(&record).await;
        let removed = self.registry.remove(id).await?;
        if purge && record.install_path.starts_with(&self.install_dir) && record.install_path.is_dir() {
            tokio::fs::remove_dir_all(&record.install_path)
                .await
                .with_context(|| format!("failed to delete {}", record.install_path.display()))?;
        }
        info!(extension_id = %id, purge, "extension removed");
        Ok(removed)
    }

    pub fn dev_reloader(&self) -> DevReloader {
        DevReloader::new(
            self.install_dir.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.runtime),
            Arc::clone(&self.loader),
        )
    }

    /// Start the dev watcher when running in development mode.
    pub fn enable_dev_watcher(&self) -> Result<Option<DevWatcher>> {
        DevWatcher::enable(self.development, self.dev_reloader())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::{registry_memory::InMemoryRegistry, testing::write_extension},
    };

    fn host(root: &std::path::Path) -> ExtensionHost {
        let loader: Arc<dyn ExtensionLoader> = Arc::new(BundleLoader::new());
        let runtime = ProcessRuntime::new(
            Arc::clone(&loader),
            Arc::new(HttpBridge::new(NetworkPolicy::default()).unwrap()),
            RuntimeOptions::default(),
        );
        ExtensionHost::new(
            root.to_path_buf(),
            false,
            Arc::new(InMemoryRegistry::new()),
            loader,
            Arc::new(runtime),
        )
    }

    #[tokio::test]
    async fn invoke_rejects_unknown_and_disabled() {
        let root = tempfile::tempdir().unwrap();
        write_extension(root.path(), "alpha", "module.exports = {};\n");
        let host = host(root.path());
        host.bootstrap().await.unwrap();

        let err = host
            .invoke("missing", "search", Value::Null, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "extension missing not found");

        host.set_enabled("alpha", false).await.unwrap();
        let err = host
            .invoke("alpha", "search", Value::Null, None)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn remove_with_purge_deletes_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = write_extension(root.path(), "alpha", "module.exports = {};\n");
        let host = host(root.path());
        host.bootstrap().await.unwrap();

        assert!(host.remove("alpha", true).await.unwrap());
        assert!(!dir.exists());
        assert!(host.registry().find_by_id("alpha").await.unwrap().is_none());
        assert!(!host.remove("alpha", true).await.unwrap());
    }

    #[tokio::test]
    async fn from_config_wires_sqlite() {
        let root = tempfile::tempdir().unwrap();
        let mut config = jamra_config::JamraConfig::default();
        config.extensions.install_dir = Some(root.path().to_path_buf());
        let pool = ExtensionHost::connect_pool("sqlite::memory:").await.unwrap();
        let host = ExtensionHost::from_config(&config, pool).await.unwrap();
        assert_eq!(host.install_dir(), &root.path().to_path_buf());
        assert!(!host.is_development());
        assert!(host.registry().list().await.unwrap().is_empty());
    }
}
