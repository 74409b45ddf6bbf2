//! Registers extensions found unpacked in the install directory.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{
    error::Result,
    loader::ExtensionLoader,
    manifest::{ExtensionManifest, ExtensionRecord, LOCAL_SOURCE, MANIFEST_FILE},
    registry::ExtensionRegistry,
};

/// Outcome of one [`register_local_extensions`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Ids upserted into the registry, in directory order.
    pub registered: Vec<String>,
    /// Directories without a usable manifest.
    pub skipped: Vec<PathBuf>,
    /// Registered ids whose precompile failed.
    pub compile_failed: Vec<String>,
}

/// Scan `install_dir/*/manifest.json`, upsert a record per manifest and warm
/// the loader. Missing directories and bad manifests are logged, not fatal.
///
/// An existing record keeps its `enabled` flag, install time, origin and
/// checksum.
pub async fn register_local_extensions(
    install_dir: &Path,
    registry: &dyn ExtensionRegistry,
    loader: &dyn ExtensionLoader,
) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    if !install_dir.is_dir() {
        warn!(install_dir = %install_dir.display(), "extension install directory does not exist");
        return Ok(report);
    }

    for dir in extension_dirs(install_dir)? {
        register_extension_dir(&dir, registry, loader, &mut report).await;
    }

    Ok(report)
}

/// Register the single extension unpacked at `dir`, recording the outcome in
/// `report`. Returns the registered id.
pub async fn register_extension_dir(
    dir: &Path,
    registry: &dyn ExtensionRegistry,
    loader: &dyn ExtensionLoader,
    report: &mut BootstrapReport,
) -> Option<String> {
    if !dir.join(MANIFEST_FILE).is_file() {
        debug!(dir = %dir.display(), "no manifest; skipping directory");
        report.skipped.push(dir.to_path_buf());
        return None;
    }
    let manifest = match ExtensionManifest::read_from_dir(dir) {
        Ok(m) => m,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "invalid extension manifest");
            report.skipped.push(dir.to_path_buf());
            return None;
        },
    };

    let mut record =
        ExtensionRecord::new(manifest, dir.to_path_buf()).with_repo_source(LOCAL_SOURCE);
    match registry.find_by_id(&record.id).await {
        Ok(Some(existing)) => {
            record.enabled = existing.enabled;
            record.installed_at_ms = existing.installed_at_ms;
            record.repo_source = existing.repo_source.or(record.repo_source);
            record.checksum = existing.checksum;
        },
        Ok(None) => {},
        Err(e) => {
            warn!(extension_id = %record.id, error = %e, "failed to look up extension record");
        },
    }

    if let Err(e) = registry.upsert(&record).await {
        warn!(extension_id = %record.id, dir = %dir.display(), error = %e, "failed to register local extension");
        return None;
    }

    let precompiled = match loader.load_source(&record).await {
        Ok(_) => true,
        Err(e) => {
            warn!(extension_id = %record.id, error = %e, "failed to compile extension during preload");
            report.compile_failed.push(record.id.clone());
            false
        },
    };
    info!(
        extension_id = %record.id,
        dir = %dir.display(),
        precompiled,
        "registered local extension"
    );
    report.registered.push(record.id.clone());
    Some(record.id)
}

/// Immediate subdirectories, sorted, excluding hidden ones (the installer
/// stages under `.staging`).
fn extension_dirs(install_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(install_dir)?
        .flatten()
        .filter(|entry| {
            !entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with('.'))
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}
