use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    schema::{Environment, JamraConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["jamra.toml", "jamra.json"];

static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);
static DATA_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Load config from the given path, with env substitution applied to the raw
/// text before parsing.
pub fn load_config(path: &Path) -> anyhow::Result<JamraConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply `JAMRA_*`
/// environment overrides.
///
/// Search order:
/// 1. `./jamra.{toml,json}` (project-local)
/// 2. `<config_dir>/jamra.{toml,json}` (user-global)
///
/// Falls back to `JamraConfig::default()` if no file is found or the file
/// fails to parse.
pub fn discover_and_load() -> JamraConfig {
    let config = if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                JamraConfig::default()
            },
        }
    } else {
        debug!("no config file found, using defaults");
        JamraConfig::default()
    };
    apply_env_overrides(config)
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "jamra")
}

/// Returns the user-global config directory (`~/.config/jamra/`), or the
/// override installed with [`set_config_dir`].
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
    {
        return Some(dir);
    }
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory holding the database and installed extensions.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
    {
        return dir;
    }
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".jamra"))
}

pub fn set_config_dir(dir: PathBuf) {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(dir);
}

pub fn clear_config_dir() {
    *CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

pub fn set_data_dir(dir: PathBuf) {
    *DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(dir);
}

pub fn clear_data_dir() {
    *DATA_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = None;
}

/// Apply `JAMRA_*` environment variable overrides on top of a parsed config.
pub fn apply_env_overrides(config: JamraConfig) -> JamraConfig {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    mut config: JamraConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> JamraConfig {
    if let Some(v) = lookup("JAMRA_ENV") {
        match v.parse::<Environment>() {
            Ok(env) => config.env = env,
            Err(e) => warn!(value = %v, error = %e, "ignoring JAMRA_ENV"),
        }
    }
    if let Some(v) = lookup("JAMRA_EXTENSIONS_INSTALL_DIR") {
        config.extensions.install_dir = Some(PathBuf::from(v));
    }
    if let Some(ms) = parse_number::<u64>(&lookup, "JAMRA_EXT_RUNTIME_TIMEOUT") {
        config.extensions.runtime.timeout_ms = ms;
    }
    if let Some(v) = lookup("JAMRA_EXT_RUNTIME_COMMAND") {
        config.extensions.runtime.command = v;
    }
    if let Some(v) = lookup("JAMRA_SANDBOX_NET_ALLOWLIST") {
        config.sandbox.allow_network_hosts = v
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(n) = parse_number::<usize>(&lookup, "JAMRA_INSTALLER_CONCURRENCY") {
        config.installer.concurrency = n.max(1);
    }
    if let Some(v) = lookup("JAMRA_INSTALLER_TEMP_DIR") {
        config.installer.temp_dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("JAMRA_DATABASE_URL") {
        config.database.url = Some(v);
    }
    config
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring non-numeric override");
            None
        },
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<JamraConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn env_overrides_apply() {
        let cfg = apply_env_overrides_with(
            JamraConfig::default(),
            env(&[
                ("JAMRA_ENV", "development"),
                ("JAMRA_EXTENSIONS_INSTALL_DIR", "/srv/ext"),
                ("JAMRA_EXT_RUNTIME_TIMEOUT", "1500"),
                ("JAMRA_SANDBOX_NET_ALLOWLIST", "a.com, b.org,,"),
                ("JAMRA_INSTALLER_CONCURRENCY", "0"),
            ]),
        );
        assert!(cfg.env.is_development());
        assert_eq!(cfg.install_dir(), PathBuf::from("/srv/ext"));
        assert_eq!(cfg.extensions.runtime.timeout_ms, 1500);
        assert_eq!(cfg.sandbox.allow_network_hosts, vec!["a.com", "b.org"]);
        assert_eq!(cfg.installer.concurrency, 1);
    }

    #[test]
    fn bad_numbers_are_ignored() {
        let cfg = apply_env_overrides_with(
            JamraConfig::default(),
            env(&[("JAMRA_EXT_RUNTIME_TIMEOUT", "soon"), ("JAMRA_ENV", "staging")]),
        );
        assert_eq!(cfg.extensions.runtime.timeout_ms, 10_000);
        assert_eq!(cfg.env, Environment::Production);
    }

    #[test]
    fn load_toml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("jamra.toml");
        std::fs::write(&toml_path, "[installer]\nconcurrency = 4\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().installer.concurrency, 4);

        let json_path = dir.path().join("jamra.json");
        std::fs::write(&json_path, r#"{"env":"test"}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().env, Environment::Test);

        let yaml_path = dir.path().join("jamra.yaml");
        std::fs::write(&yaml_path, "env: test").unwrap();
        assert!(load_config(&yaml_path).is_err());
    }
}
