//! Fixtures shared by unit tests across modules.

use std::path::{Path, PathBuf};

use crate::manifest::{ExtensionManifest, ExtensionRecord};

pub(crate) fn manifest(id: &str, version: &str, entry: &str) -> ExtensionManifest {
    ExtensionManifest::from_json(&format!(
        r#"{{"id":"{id}","name":"{id}","version":"{version}","entry":"{entry}"}}"#
    ))
    .unwrap_or_else(|e| panic!("fixture manifest: {e}"))
}

pub(crate) fn record(id: &str, version: &str) -> ExtensionRecord {
    ExtensionRecord::new(
        manifest(id, version, "index.js"),
        PathBuf::from(format!("/ext/{id}")),
    )
}

/// Write `<root>/<id>/manifest.json` plus the entry file, returning the
/// extension directory.
pub(crate) fn write_extension(root: &Path, id: &str, entry_body: &str) -> PathBuf {
    let dir = root.join(id);
    std::fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("mkdir: {e}"));
    let manifest = serde_json::to_string(&manifest(id, "1.0.0", "index.js"))
        .unwrap_or_else(|e| panic!("serialize: {e}"));
    std::fs::write(dir.join("manifest.json"), manifest).unwrap_or_else(|e| panic!("write: {e}"));
    std::fs::write(dir.join("index.js"), entry_body).unwrap_or_else(|e| panic!("write: {e}"));
    dir
}
