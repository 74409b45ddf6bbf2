//! Network access for the installer: index documents and package tarballs.

use std::time::Duration;

use {
    async_trait::async_trait,
    jamra_config::InstallerConfig,
    reqwest::StatusCode,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    index::{IndexEntry, RepositoryIndex},
    source,
};

/// Where the installer gets indexes and packages from.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn fetch_index(&self, repository_url: &str, branch: &str) -> Result<RepositoryIndex>;

    /// Raw gzip tarball bytes for `entry`.
    async fn download_package(&self, entry: &IndexEntry) -> Result<Vec<u8>>;
}

/// HTTP implementation over `reqwest`.
pub struct RepositoryFetcher {
    client: reqwest::Client,
    user_agent: String,
    index_timeout: Duration,
    package_timeout: Duration,
}

impl RepositoryFetcher {
    pub fn new(config: &InstallerConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            user_agent: config.user_agent.clone(),
            index_timeout: Duration::from_millis(config.index_timeout_ms),
            package_timeout: Duration::from_millis(config.package_timeout_ms),
        })
    }

    /// Fetch and validate an index from an already-resolved raw URL.
    pub async fn fetch_index_at(&self, raw_url: &str) -> Result<RepositoryIndex> {
        debug!(url = %raw_url, "fetching repository index");
        let resp = self
            .client
            .get(raw_url)
            .header("User-Agent", &self.user_agent)
            .timeout(self.index_timeout)
            .send()
            .await
            .map_err(|e| fetch_failed("repository index", raw_url, &e))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::validation(format!(
                "index.json not found in repository at {raw_url}"
            )));
        }
        if !status.is_success() {
            return Err(Error::domain(format!(
                "Failed to fetch repository index: HTTP {status} from {raw_url}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| fetch_failed("repository index", raw_url, &e))?;
        RepositoryIndex::parse(&body)
    }

    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "downloading extension package");
        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .timeout(self.package_timeout)
            .send()
            .await
            .map_err(|e| fetch_failed("extension package", url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::domain(format!(
                "Failed to fetch extension package: HTTP {status} from {url}"
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| fetch_failed("extension package", url, &e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl RepositorySource for RepositoryFetcher {
    async fn fetch_index(&self, repository_url: &str, branch: &str) -> Result<RepositoryIndex> {
        let raw_url = source::index_url(repository_url, branch)?;
        self.fetch_index_at(&raw_url).await
    }

    async fn download_package(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        self.download(&entry.source_url).await
    }
}

fn fetch_failed(what: &str, url: &str, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::domain(format!("Failed to fetch {what}: request to {url} timed out"))
    } else {
        Error::domain(format!("Failed to fetch {what}: {err}"))
    }
}
