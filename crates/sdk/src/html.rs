//! Rate-limited HTML fetching for scraper-style sources.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::Semaphore,
    tracing::debug,
    url::Url,
};

use crate::error::{Context, Error, Result};

/// Fetches page bodies for a [`crate::pages::PagePipeline`].
#[async_trait]
pub trait ScraperClient: Send + Sync {
    async fn get(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
    ) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct HtmlScraperOptions {
    pub base_url: String,
    pub default_headers: BTreeMap<String, String>,
    /// Empty allows any host.
    pub allowed_hosts: Vec<String>,
    /// `None` or zero means unbounded.
    pub max_concurrent: Option<usize>,
    pub timeout: Option<Duration>,
}

pub struct HtmlScraperClient {
    client: reqwest::Client,
    base_url: Url,
    default_headers: BTreeMap<String, String>,
    allowed_hosts: HashSet<String>,
    permits: Option<Semaphore>,
    timeout: Option<Duration>,
}

impl HtmlScraperClient {
    pub fn new(options: HtmlScraperOptions) -> Result<Self> {
        let base = format!("{}/", options.base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base)
            .map_err(|e| Error::validation(format!("invalid base URL {}: {e}", options.base_url)))?;
        let allowed_hosts = options
            .allowed_hosts
            .iter()
            .map(|host| {
                host.trim()
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_ascii_lowercase()
            })
            .filter(|host| !host.is_empty())
            .collect();
        Ok(Self {
            client: reqwest::Client::builder()
                .build()
                .context("failed to build HTTP client")?,
            base_url,
            default_headers: options.default_headers,
            allowed_hosts,
            permits: options
                .max_concurrent
                .filter(|n| *n > 0)
                .map(Semaphore::new),
            timeout: options.timeout,
        })
    }

    /// Absolute URL for `path` (or an absolute URL passed through) with
    /// `params` set as query parameters.
    pub fn build_url(&self, path: &str, params: &BTreeMap<String, String>) -> Result<Url> {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)?
        } else {
            self.base_url.join(path.trim_start_matches('/'))?
        };
        if !params.is_empty() {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| !params.contains_key(k.as_ref()))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(kept);
            query.extend_pairs(params);
        }
        Ok(url)
    }

    fn check_host(&self, url: &Url) -> Result<()> {
        if self.allowed_hosts.is_empty() {
            return Ok(());
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        if !self.allowed_hosts.contains(&host) {
            return Err(Error::validation(format!(
                "Blocked request to unsupported host: {host}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ScraperClient for HtmlScraperClient {
    async fn get(
        &self,
        path: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
    ) -> Result<String> {
        let url = self.build_url(path, params)?;
        self.check_host(&url)?;

        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .acquire()
                    .await
                    .map_err(|e| Error::domain(format!("scraper client closed: {e}")))?,
            ),
            None => None,
        };

        debug!(%url, "scraper GET");
        let mut request = self.client.get(url.clone());
        for (key, value) in self.default_headers.iter().chain(headers) {
            request = request.header(key.as_str(), value.as_str());
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let resp = request
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::domain(format!(
                "Request to {url} failed with status {}",
                status.as_u16()
            )));
        }
        Ok(resp.text().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn client(base_url: &str, allowed: &[&str]) -> HtmlScraperClient {
        HtmlScraperClient::new(HtmlScraperOptions {
            base_url: base_url.to_string(),
            allowed_hosts: allowed.iter().map(|h| h.to_string()).collect(),
            ..HtmlScraperOptions::default()
        })
        .unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn builds_urls_from_base_path_and_params() {
        let c = client("https://weebcentral.com/", &[]);
        assert_eq!(
            c.build_url("/series/abc", &params(&[("page", "2")]))
                .unwrap()
                .as_str(),
            "https://weebcentral.com/series/abc?page=2"
        );
        assert_eq!(
            c.build_url("https://cdn.example.com/a?page=1&x=y", &params(&[("page", "3")]))
                .unwrap()
                .as_str(),
            "https://cdn.example.com/a?x=y&page=3"
        );
    }

    #[tokio::test]
    async fn fetches_html_with_merged_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/chapters/42/images")
            .match_query(mockito::Matcher::UrlEncoded("reading_style".into(), "long_strip".into()))
            .match_header("referer", "https://weebcentral.com/")
            .match_header("x-extra", "1")
            .with_status(200)
            .with_body("<img src=\"a.png\">")
            .create_async()
            .await;

        let c = HtmlScraperClient::new(HtmlScraperOptions {
            base_url: server.url(),
            default_headers: params(&[("Referer", "https://weebcentral.com/")]),
            max_concurrent: Some(2),
            ..HtmlScraperOptions::default()
        })
        .unwrap();
        let body = c
            .get(
                "chapters/42/images",
                &params(&[("reading_style", "long_strip")]),
                &params(&[("X-Extra", "1")]),
            )
            .await
            .unwrap();
        assert_eq!(body, "<img src=\"a.png\">");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_names_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;
        let c = client(&server.url(), &[]);
        let err = c
            .get("/missing", &BTreeMap::new(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Request to {}/missing failed with status 404", server.url())
        );
    }

    #[tokio::test]
    async fn unlisted_host_is_blocked() {
        let c = client("https://weebcentral.com", &["https://weebcentral.com"]);
        let err = c
            .get("https://evil.example/x", &BTreeMap::new(), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Blocked request to unsupported host: evil.example");
    }
}
