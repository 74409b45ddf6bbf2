//! Repository index (`index.json`) model and strict schema validation.
//!
//! Validation walks the raw JSON before deserializing so every message can
//! cite the offending field path.

use std::{collections::BTreeMap, sync::LazyLock};

use {
    jamra_extensions::manifest::ExtensionLanguage,
    regex::Regex,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::error::{Error, Result};

pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0"];

const INDEX_KEYS: &[&str] = &["version", "repository", "extensions"];
const REPOSITORY_KEYS: &[&str] = &["name", "url", "author", "description"];
const EXTENSION_KEYS: &[&str] = &[
    "id",
    "name",
    "version",
    "author",
    "description",
    "language",
    "entrypoint",
    "sourceUrl",
    "dependencies",
];
const EXTENSION_STRING_FIELDS: &[&str] = &[
    "id",
    "name",
    "version",
    "author",
    "description",
    "language",
    "entrypoint",
    "sourceUrl",
];

static SEMVER: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+(-[\w.]+)?(\+[\w.]+)?$"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub version: String,
    pub repository: RepositoryInfo,
    pub extensions: Vec<IndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub url: String,
    pub author: String,
    pub description: String,
}

/// One installable extension listed in an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub language: ExtensionLanguage,
    pub entrypoint: String,
    /// Gzip tarball of the extension sources.
    pub source_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
}

impl RepositoryIndex {
    /// Parse and validate the body of an `index.json`.
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| Error::validation(format!("Invalid JSON in index.json: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        validate_index(value)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&IndexEntry> {
        self.extensions.iter().find(|e| e.id == id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.id.as_str()).collect()
    }
}

/// Check `value` against the repository index schema.
pub fn validate_index(value: &Value) -> Result<()> {
    let Some(root) = value.as_object() else {
        return Err(Error::validation(
            "Invalid repository index: must be an object",
        ));
    };
    reject_unknown_keys(root, INDEX_KEYS, "repository index")?;

    let Some(version) = root.get("version").and_then(Value::as_str) else {
        return Err(Error::validation(
            "Invalid or missing version field: must be a string",
        ));
    };
    if !SUPPORTED_SCHEMA_VERSIONS.contains(&version) {
        return Err(Error::validation(format!(
            "Unsupported schema version: {version}. Supported versions: {}",
            SUPPORTED_SCHEMA_VERSIONS.join(", ")
        )));
    }

    validate_repository(root.get("repository"))?;

    let Some(extensions) = root.get("extensions").and_then(Value::as_array) else {
        return Err(Error::validation(
            "Invalid extensions field: must be an array",
        ));
    };
    if extensions.is_empty() {
        return Err(Error::validation("Extensions array cannot be empty"));
    }
    for (index, extension) in extensions.iter().enumerate() {
        validate_extension(extension, index)?;
    }
    Ok(())
}

fn validate_repository(value: Option<&Value>) -> Result<()> {
    let Some(repository) = value.and_then(Value::as_object) else {
        return Err(Error::validation(
            "Invalid repository field: must be an object",
        ));
    };
    reject_unknown_keys(repository, REPOSITORY_KEYS, "repository object")?;
    for field in REPOSITORY_KEYS {
        required_string(repository, field, &format!("repository.{field}"))?;
    }
    let url = required_string(repository, "url", "repository.url")?;
    if url::Url::parse(url).is_err() {
        return Err(Error::validation(
            "Invalid repository.url: must be a valid URL",
        ));
    }
    Ok(())
}

fn validate_extension(value: &Value, index: usize) -> Result<()> {
    let Some(extension) = value.as_object() else {
        return Err(Error::validation(format!(
            "Invalid extension at index {index}: must be an object"
        )));
    };
    let prefix = format!("extension[{index}]");
    reject_unknown_keys(extension, EXTENSION_KEYS, &prefix)?;
    for field in EXTENSION_STRING_FIELDS {
        required_string(extension, field, &format!("{prefix}.{field}"))?;
    }

    let language = required_string(extension, "language", "")?;
    if !matches!(language, "typescript" | "javascript") {
        return Err(Error::validation(format!(
            "Invalid {prefix}.language: must be one of typescript, javascript"
        )));
    }

    let version = required_string(extension, "version", "")?;
    let semver = SEMVER
        .as_ref()
        .map_err(|e| Error::domain(format!("semver pattern failed to compile: {e}")))?;
    if !semver.is_match(version) {
        return Err(Error::validation(format!(
            "Invalid {prefix}.version: must be valid semver format (e.g., \"1.0.0\")"
        )));
    }

    let source_url = required_string(extension, "sourceUrl", "")?;
    if url::Url::parse(source_url).is_err() {
        return Err(Error::validation(format!(
            "Invalid {prefix}.sourceUrl: must be a valid URL"
        )));
    }

    if let Some(dependencies) = extension.get("dependencies") {
        let Some(dependencies) = dependencies.as_object() else {
            return Err(Error::validation(format!(
                "Invalid {prefix}.dependencies: must be an object"
            )));
        };
        if !dependencies.values().all(Value::is_string) {
            return Err(Error::validation(format!(
                "Invalid {prefix}.dependencies: all keys and values must be strings"
            )));
        }
    }
    Ok(())
}

fn reject_unknown_keys(object: &Map<String, Value>, allowed: &[&str], what: &str) -> Result<()> {
    let unknown: Vec<&str> = object
        .keys()
        .map(String::as_str)
        .filter(|key| !allowed.contains(key))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    Err(Error::validation(format!(
        "Unknown keys in {what}: {}",
        unknown.join(", ")
    )))
}

fn required_string<'a>(
    object: &'a Map<String, Value>,
    field: &str,
    label: &str,
) -> Result<&'a str> {
    match object.get(field).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::validation(format!(
            "Invalid or missing {label}: must be a string"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    fn sample() -> Value {
        json!({
            "version": "1.0",
            "repository": {
                "name": "Acme Pack",
                "url": "https://github.com/acme/pack",
                "author": "acme",
                "description": "Sources maintained by acme"
            },
            "extensions": [{
                "id": "weebcentral",
                "name": "WeebCentral",
                "version": "1.2.0-beta.1",
                "author": "acme",
                "description": "WeebCentral source",
                "language": "typescript",
                "entrypoint": "src/index.ts",
                "sourceUrl": "https://example.com/weebcentral.tar.gz",
                "dependencies": { "cheerio": "^1.0.0" }
            }]
        })
    }

    fn message(value: &Value) -> String {
        let err = validate_index(value).unwrap_err();
        assert!(err.is_validation(), "{err}");
        err.to_string()
    }

    #[test]
    fn valid_index_parses() {
        let index = RepositoryIndex::from_value(&sample()).unwrap();
        assert_eq!(index.ids(), vec!["weebcentral"]);
        let entry = index.find("weebcentral").unwrap();
        assert_eq!(entry.language, ExtensionLanguage::Typescript);
        assert_eq!(entry.dependencies.get("cheerio").unwrap(), "^1.0.0");
        assert!(index.find("other").is_none());
    }

    #[test]
    fn invalid_json_is_reported() {
        let err = RepositoryIndex::parse("{ nope").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("Invalid JSON in index.json:"));
    }

    #[test]
    fn missing_extension_id_cites_field_path() {
        let mut value = sample();
        value["extensions"][0].as_object_mut().unwrap().remove("id");
        assert_eq!(
            message(&value),
            "Invalid or missing extension[0].id: must be a string"
        );
    }

    #[test]
    fn unknown_keys_are_rejected_at_every_level() {
        let mut value = sample();
        value["extra"] = json!(1);
        assert_eq!(message(&value), "Unknown keys in repository index: extra");

        let mut value = sample();
        value["repository"]["homepage"] = json!("x");
        assert_eq!(message(&value), "Unknown keys in repository object: homepage");

        let mut value = sample();
        value["extensions"][0]["icon"] = json!("x");
        assert_eq!(message(&value), "Unknown keys in extension[0]: icon");
    }

    #[test]
    fn version_language_and_urls_are_checked() {
        let mut value = sample();
        value["version"] = json!("2.0");
        assert_eq!(
            message(&value),
            "Unsupported schema version: 2.0. Supported versions: 1.0"
        );

        let mut value = sample();
        value["extensions"][0]["language"] = json!("python");
        assert!(message(&value).contains("extension[0].language"));

        let mut value = sample();
        value["extensions"][0]["version"] = json!("1.0");
        assert!(message(&value).contains("semver"));

        let mut value = sample();
        value["extensions"][0]["sourceUrl"] = json!("not a url");
        assert_eq!(
            message(&value),
            "Invalid extension[0].sourceUrl: must be a valid URL"
        );

        let mut value = sample();
        value["repository"]["url"] = json!("nope");
        assert_eq!(message(&value), "Invalid repository.url: must be a valid URL");
    }

    #[test]
    fn empty_extensions_and_bad_dependencies() {
        let mut value = sample();
        value["extensions"] = json!([]);
        assert_eq!(message(&value), "Extensions array cannot be empty");

        let mut value = sample();
        value["extensions"][0]["dependencies"] = json!({ "cheerio": 1 });
        assert!(message(&value).contains("all keys and values must be strings"));

        let mut value = sample();
        value["extensions"][0]["dependencies"] = json!(["cheerio"]);
        assert_eq!(
            message(&value),
            "Invalid extension[0].dependencies: must be an object"
        );
    }
}
