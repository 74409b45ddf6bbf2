//! Compiles an extension's entry file into one executable unit and caches
//! the result per extension id.

mod bundle;
mod esm;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    tokio::sync::RwLock,
    tracing::{debug, info},
};

pub use bundle::SUPPORTED_ENTRY_EXTENSIONS;

use crate::{
    error::{Error, Result},
    manifest::ExtensionRecord,
};

/// Compiled, self-contained plugin code ready to be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedExtensionSource {
    /// Script whose completion value is the entry module's exports.
    pub code: String,
    pub entry_path: PathBuf,
    /// Index source map, also embedded inline in `code`.
    pub source_map: Option<String>,
}

#[async_trait]
pub trait ExtensionLoader: Send + Sync {
    /// Compile (or return the cached compilation of) the record's entry.
    ///
    /// The first successful load for an id wins until [`unload`](Self::unload)
    /// is called.
    async fn load_source(&self, record: &ExtensionRecord) -> Result<Arc<LoadedExtensionSource>>;

    /// Compile the record's entry without reading or filling the cache.
    async fn compile(&self, record: &ExtensionRecord) -> Result<LoadedExtensionSource>;

    /// Evict the cached compilation for the record's id. No-op if absent.
    async fn unload(&self, record: &ExtensionRecord);
}

/// Bundles entries with the TypeScript/JavaScript transpiler on the blocking
/// pool.
#[derive(Default)]
pub struct BundleLoader {
    cache: RwLock<HashMap<String, Arc<LoadedExtensionSource>>>,
}

impl BundleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached compilations.
    pub async fn cached(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn check_entry_extension(record: &ExtensionRecord, entry: &Path) -> Result<()> {
    let ext = entry
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if SUPPORTED_ENTRY_EXTENSIONS.contains(&ext.as_str()) {
        return Ok(());
    }
    Err(Error::validation(format!(
        "Unsupported extension entry file type for {}: {} (expected one of {})",
        record.id,
        record.manifest.entry,
        SUPPORTED_ENTRY_EXTENSIONS
            .iter()
            .map(|e| format!(".{e}"))
            .collect::<Vec<_>>()
            .join(", ")
    )))
}

#[async_trait]
impl ExtensionLoader for BundleLoader {
    async fn load_source(&self, record: &ExtensionRecord) -> Result<Arc<LoadedExtensionSource>> {
        if let Some(hit) = self.cache.read().await.get(&record.id) {
            return Ok(Arc::clone(hit));
        }

        let loaded = Arc::new(self.compile(record).await?);
        let mut cache = self.cache.write().await;
        // A concurrent load may have finished first; keep its result.
        let stored = cache
            .entry(record.id.clone())
            .or_insert_with(|| Arc::clone(&loaded));
        info!(extension_id = %record.id, bytes = stored.code.len(), "compiled extension");
        Ok(Arc::clone(stored))
    }

    async fn compile(&self, record: &ExtensionRecord) -> Result<LoadedExtensionSource> {
        let entry_path = record.entry_path();
        check_entry_extension(record, &entry_path)?;

        let root = record.install_path.clone();
        let entry = entry_path.clone();
        let bundled = tokio::task::spawn_blocking(move || bundle::bundle_entry(&root, &entry))
            .await
            .map_err(|e| Error::domain(format!("bundler task failed: {e}")))?
            .map_err(|e| match e {
                Error::Validation { message } => Error::validation(format!(
                    "failed to compile extension {}: {message}",
                    record.id
                )),
                other => Error::domain(format!(
                    "failed to compile extension {}: {other}",
                    record.id
                )),
            })?;

        Ok(LoadedExtensionSource {
            code: bundled.code,
            entry_path,
            source_map: bundled.source_map,
        })
    }

    async fn unload(&self, record: &ExtensionRecord) {
        if self.cache.write().await.remove(&record.id).is_some() {
            debug!(extension_id = %record.id, "evicted compiled extension");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::manifest::ExtensionManifest};

    fn record(dir: &Path, entry: &str) -> ExtensionRecord {
        let manifest = ExtensionManifest::from_json(&format!(
            r#"{{"id":"demo","name":"Demo","version":"0.1.0","entry":"{entry}"}}"#
        ))
        .unwrap();
        ExtensionRecord::new(manifest, dir.to_path_buf())
    }

    #[tokio::test]
    async fn second_load_returns_cached_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.js"),
            "module.exports = { search: async () => [] };\n",
        )
        .unwrap();
        let rec = record(dir.path(), "index.js");
        let loader = BundleLoader::new();

        let first = loader.load_source(&rec).await.unwrap();
        // Edits are not picked up until unload.
        std::fs::write(dir.path().join("index.js"), "module.exports = {};\n").unwrap();
        let second = loader.load_source(&rec).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.entry_path, dir.path().join("index.js"));

        loader.unload(&rec).await;
        assert_eq!(loader.cached().await, 0);
        let third = loader.load_source(&rec).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(!third.code.contains("search"));
    }

    #[tokio::test]
    async fn unsupported_entry_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        let err = BundleLoader::new()
            .load_source(&record(dir.path(), "main.py"))
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("Unsupported extension entry file type"));
    }

    #[tokio::test]
    async fn compile_bypasses_the_cache() {
        let live = tempfile::tempdir().unwrap();
        std::fs::write(live.path().join("index.js"), "module.exports = { v: 1 };\n").unwrap();
        let staged = tempfile::tempdir().unwrap();
        std::fs::write(staged.path().join("index.ts"), "export const = ;\n").unwrap();

        let loader = BundleLoader::new();
        let cached = loader.load_source(&record(live.path(), "index.js")).await.unwrap();

        // Same id as the cached build, but a broken tree still fails.
        let err = loader
            .compile(&record(staged.path(), "index.ts"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to compile extension demo"));

        std::fs::write(staged.path().join("index.ts"), "export const v = 2;\n").unwrap();
        let fresh = loader.compile(&record(staged.path(), "index.ts")).await.unwrap();
        assert!(fresh.code.contains("v = 2"));

        assert_eq!(loader.cached().await, 1);
        let again = loader.load_source(&record(live.path(), "index.js")).await.unwrap();
        assert!(Arc::ptr_eq(&cached, &again));
    }

    #[tokio::test]
    async fn unload_of_unknown_id_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BundleLoader::new();
        loader.unload(&record(dir.path(), "index.js")).await;
        assert_eq!(loader.cached().await, 0);
    }

    #[tokio::test]
    async fn compile_errors_name_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "export const = ;\n").unwrap();
        let err = BundleLoader::new()
            .load_source(&record(dir.path(), "index.ts"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to compile extension demo"));
    }
}
