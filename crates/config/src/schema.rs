/// Config schema types (extensions, runtime, sandbox, installer, database).
use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Execution mode of the host process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
}

impl Environment {
    #[must_use]
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JamraConfig {
    pub env: Environment,
    pub extensions: ExtensionsConfig,
    pub sandbox: SandboxConfig,
    pub installer: InstallerConfig,
    pub database: DatabaseConfig,
}

impl JamraConfig {
    /// Directory holding one subdirectory per installed extension.
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.extensions
            .install_dir
            .clone()
            .unwrap_or_else(|| crate::data_dir().join("extensions"))
    }

    /// Staging area for package downloads. Lives under the install dir by
    /// default so the final move is a same-filesystem rename.
    #[must_use]
    pub fn installer_temp_dir(&self) -> PathBuf {
        self.installer
            .temp_dir
            .clone()
            .unwrap_or_else(|| self.install_dir().join(".staging"))
    }

    #[must_use]
    pub fn database_url(&self) -> String {
        self.database.url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}?mode=rwc",
                crate::data_dir().join("jamra.db").display()
            )
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Overrides `<data_dir>/extensions`.
    pub install_dir: Option<PathBuf>,
    pub runtime: RuntimeConfig,
}

/// How plugin workers are spawned and bounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default per-invocation timeout.
    pub timeout_ms: u64,
    /// Script engine executable. Must accept `-e <source>`.
    pub command: String,
    /// Extra arguments placed before `-e`.
    pub args: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            command: "node".into(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Hosts plugin code may reach. `*.example.com` matches subdomains.
    /// Empty means no outbound access at all.
    pub allow_network_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Maximum number of installs running at once.
    pub concurrency: usize,
    pub temp_dir: Option<PathBuf>,
    pub index_timeout_ms: u64,
    pub package_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            temp_dir: None,
            index_timeout_ms: 10_000,
            package_timeout_ms: 60_000,
            user_agent: "jamra-extension-installer".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection string. Defaults to `<data_dir>/jamra.db`.
    pub url: Option<String>,
}
