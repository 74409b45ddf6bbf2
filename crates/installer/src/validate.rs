//! Checks an unpacked package against the index entry it was installed for.

use {
    jamra_extensions::manifest::{ExtensionManifest, MANIFEST_FILE},
    serde_json::Value,
};

use crate::{
    error::{Context, Error, Result},
    package::{StagedPackage, normalize_relative},
};

/// Validate the staged manifest and file list, returning the parsed manifest.
pub fn validate_package(staged: &StagedPackage, expected_id: &str) -> Result<ExtensionManifest> {
    let path = staged.path().join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| Error::validation(format!("Invalid JSON in {MANIFEST_FILE}: {e}")))?;
    validate_manifest(&value, &staged.files, expected_id)
}

/// Ids become directory names under the install dir.
pub fn check_extension_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(Error::validation(format!(
            "Invalid extension id {id:?}: must be a single path segment of letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(())
}

/// Pure form of [`validate_package`] over an already-read manifest.
pub fn validate_manifest(
    manifest: &Value,
    files: &[String],
    expected_id: &str,
) -> Result<ExtensionManifest> {
    if files.is_empty() {
        return Err(Error::validation("Extension package contains no files"));
    }

    for field in ["id", "name", "version"] {
        let present = manifest
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| !v.trim().is_empty());
        if !present {
            return Err(Error::validation(format!(
                "Invalid or missing manifest.{field}: must be a non-empty string"
            )));
        }
    }

    let parsed: ExtensionManifest = serde_json::from_value(manifest.clone())
        .map_err(|e| Error::validation(format!("invalid manifest: {e}")))?;
    if parsed.id != expected_id {
        return Err(Error::validation(format!(
            "Manifest id {} does not match requested extension {expected_id}",
            parsed.id
        )));
    }

    let entry = normalize_relative(&parsed.entry);
    if entry.is_empty() || !files.iter().any(|f| *f == entry) {
        return Err(Error::validation(format!(
            "Entrypoint {} not found in extension package",
            parsed.entry
        )));
    }
    Ok(parsed)
}
