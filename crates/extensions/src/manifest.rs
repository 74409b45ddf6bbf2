use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Context, Error, Result};

/// File name every extension package carries at its root.
pub const MANIFEST_FILE: &str = "manifest.json";

// ── Manifest ────────────────────────────────────────────────────────────────

/// Language the entry file is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionLanguage {
    #[default]
    Javascript,
    Typescript,
}

/// Optional feature flags an extension advertises to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtensionCapabilities {
    pub supports_search: Option<bool>,
    pub supports_chapters: Option<bool>,
    pub supports_pages: Option<bool>,
    pub supports_settings: Option<bool>,
}

/// Plugin-authored `manifest.json`. Read-only to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Entry file, relative to the install directory.
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub language: ExtensionLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_schema: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ExtensionCapabilities>,
}

impl ExtensionManifest {
    /// Parse a manifest from raw JSON, rejecting blank identity fields.
    pub fn from_json(raw: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(raw)
            .map_err(|e| Error::validation(format!("invalid manifest: {e}")))?;
        manifest.check_identity()?;
        Ok(manifest)
    }

    /// Read `<dir>/manifest.json`.
    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&raw)
    }

    fn check_identity(&self) -> Result<()> {
        for (field, value) in [
            ("id", &self.id),
            ("name", &self.name),
            ("version", &self.version),
            ("entry", &self.entry),
        ] {
            if value.trim().is_empty() {
                return Err(Error::validation(format!(
                    "manifest field `{field}` must be a non-empty string"
                )));
            }
        }
        Ok(())
    }
}

// ── Record ──────────────────────────────────────────────────────────────────

/// Origin tag for extensions discovered on disk rather than installed.
pub const LOCAL_SOURCE: &str = "local";

/// The host's persisted view of an installed extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRecord {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repo_source: Option<String>,
    pub install_path: PathBuf,
    pub enabled: bool,
    /// Unix milliseconds.
    #[serde(rename = "installedAt", alias = "installedAtMs")]
    pub installed_at_ms: u64,
    #[serde(default)]
    pub checksum: Option<String>,
    pub manifest: ExtensionManifest,
}

impl ExtensionRecord {
    /// Build an enabled record for `manifest` unpacked at `install_path`.
    pub fn new(manifest: ExtensionManifest, install_path: PathBuf) -> Self {
        Self {
            id: manifest.id.clone(),
            slug: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            repo_source: None,
            install_path,
            enabled: true,
            installed_at_ms: jamra_common::now_ms(),
            checksum: None,
            manifest,
        }
    }

    #[must_use]
    pub fn with_repo_source(mut self, source: impl Into<String>) -> Self {
        self.repo_source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Absolute path of the entry file declared by the manifest.
    pub fn entry_path(&self) -> PathBuf {
        self.install_path.join(&self.manifest.entry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "id": "weebcentral",
        "name": "Weeb Central",
        "version": "1.2.0",
        "entry": "src/index.ts",
        "language": "typescript",
        "settingsSchema": {"type": "object"},
        "capabilities": {"supportsSearch": true},
        "unknownField": 1
    }"#;

    #[test]
    fn parses_camel_case_manifest() {
        let m = ExtensionManifest::from_json(SAMPLE).unwrap();
        assert_eq!(m.id, "weebcentral");
        assert_eq!(m.language, ExtensionLanguage::Typescript);
        assert!(m.settings_schema.is_some());
        assert_eq!(
            m.capabilities.unwrap().supports_search,
            Some(true)
        );
    }

    #[test]
    fn blank_name_is_rejected() {
        let err = ExtensionManifest::from_json(
            r#"{"id":"a","name":" ","version":"1.0.0","entry":"index.js"}"#,
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("`name`"));
    }

    #[test]
    fn record_defaults_follow_manifest() {
        let m = ExtensionManifest::from_json(SAMPLE).unwrap();
        let rec = ExtensionRecord::new(m, PathBuf::from("/ext/weebcentral"))
            .with_repo_source(LOCAL_SOURCE);
        assert_eq!(rec.slug, "weebcentral");
        assert!(rec.enabled);
        assert_eq!(rec.repo_source.as_deref(), Some("local"));
        assert_eq!(
            rec.entry_path(),
            PathBuf::from("/ext/weebcentral/src/index.ts")
        );
    }

    #[test]
    fn record_serializes_installed_at() {
        let m = ExtensionManifest::from_json(SAMPLE).unwrap();
        let mut rec = ExtensionRecord::new(m, PathBuf::from("/ext/weebcentral"));
        rec.installed_at_ms = 1_700_000_000_000;

        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["installedAt"], 1_700_000_000_000u64);
        assert!(value.get("installedAtMs").is_none());

        let mut older = value.clone();
        let stamp = older.as_object_mut().unwrap().remove("installedAt").unwrap();
        older["installedAtMs"] = stamp;
        let back: ExtensionRecord = serde_json::from_value(older).unwrap();
        assert_eq!(back.installed_at_ms, 1_700_000_000_000);
    }
}
