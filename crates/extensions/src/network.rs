//! Outbound HTTP available to plugin code, gated by a host allowlist.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::debug,
    url::Url,
};

use crate::error::{Error, Result};

/// Default per-request timeout when the plugin does not pass one.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

const MAX_REDIRECTS: usize = 10;

/// Hosts plugin code may contact.
///
/// Entries are exact host names, or `*.example.com` to match any subdomain
/// of `example.com` (but not `example.com` itself). An empty policy denies
/// everything.
#[derive(Debug, Clone, Default)]
pub struct NetworkPolicy {
    exact: HashSet<String>,
    suffixes: Vec<String>,
}

impl NetworkPolicy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut policy = Self::default();
        for host in hosts {
            let host = host.as_ref().trim().trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() {
                continue;
            }
            match host.strip_prefix("*.") {
                Some(domain) => policy.suffixes.push(format!(".{domain}")),
                None => {
                    policy.exact.insert(host);
                },
            }
        }
        policy
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.suffixes.is_empty()
    }

    #[must_use]
    pub fn allows_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.exact.contains(&host) || self.suffixes.iter().any(|s| host.ends_with(s.as_str()))
    }

    /// Parse `raw` and reject it unless it is http(s) to an allowed host.
    pub fn check_url(&self, raw: &str) -> Result<Url> {
        let url =
            Url::parse(raw).map_err(|e| Error::validation(format!("invalid URL {raw}: {e}")))?;
        match url.scheme() {
            "http" | "https" => {},
            s => return Err(Error::validation(format!("unsupported URL scheme: {s}"))),
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::validation(format!("URL has no host: {raw}")))?;
        if !self.allows_host(host) {
            return Err(Error::validation(format!(
                "host {host} is not in the extension network allowlist"
            )));
        }
        Ok(url)
    }
}

/// `ctx.http.get(url, options)` as sent by the worker.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpGetRequest {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub search_params: BTreeMap<String, Value>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpGetResponse {
    pub status: u16,
    /// Parsed JSON when the response says it is JSON, text otherwise.
    pub body: Value,
}

/// Performs allowlisted GET requests on behalf of plugins.
pub struct HttpBridge {
    policy: Arc<NetworkPolicy>,
    client: reqwest::Client,
}

impl HttpBridge {
    pub fn new(policy: NetworkPolicy) -> Result<Self> {
        let policy = Arc::new(policy);
        let redirect_policy = Arc::clone(&policy);
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::custom(move |attempt| {
                if attempt.previous().len() >= MAX_REDIRECTS {
                    return attempt.error("too many redirects");
                }
                match attempt.url().host_str() {
                    Some(host) if redirect_policy.allows_host(host) => attempt.follow(),
                    _ => attempt.error("redirect target is not in the extension network allowlist"),
                }
            }))
            .build()?;
        Ok(Self { policy, client })
    }

    pub fn policy(&self) -> &NetworkPolicy {
        &self.policy
    }

    pub async fn get(&self, request: HttpGetRequest) -> Result<HttpGetResponse> {
        let mut url = self.policy.check_url(&request.url)?;
        if !request.search_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.search_params {
                match value {
                    Value::Null => continue,
                    Value::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }

        let timeout = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);
        debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "extension http get");

        let mut builder = self.client.get(url.clone()).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::domain(format!("Request to {url} timed out after {}ms", timeout.as_millis()))
            } else {
                Error::domain(format!("Request to {url} failed: {e}"))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::domain(format!(
                "Request to {url} failed with status {status}"
            )));
        }

        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
        let text = resp.text().await?;
        let body = if is_json {
            serde_json::from_str(&text).map_err(|e| {
                Error::domain(format!("Request to {url} returned invalid JSON: {e}"))
            })?
        } else {
            Value::String(text)
        };

        Ok(HttpGetResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn exact_and_wildcard_hosts() {
        let policy = NetworkPolicy::new(["MangaDex.org", "*.mangadex.network", " "]);
        assert!(policy.allows_host("mangadex.org"));
        assert!(policy.allows_host("uploads.mangadex.network"));
        assert!(!policy.allows_host("mangadex.network"));
        assert!(!policy.allows_host("evilmangadex.org"));
        assert!(!policy.allows_host("api.mangadex.org"));
    }

    #[test]
    fn empty_policy_denies_everything() {
        let policy = NetworkPolicy::new(Vec::<String>::new());
        assert!(policy.is_empty());
        let err = policy.check_url("https://example.com/").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("example.com"));
    }

    #[test]
    fn non_http_schemes_are_rejected() {
        let policy = NetworkPolicy::new(["localhost"]);
        assert!(policy.check_url("file:///etc/passwd").is_err());
        assert!(policy.check_url("not a url").is_err());
    }

    fn bridge_for(server: &mockito::Server) -> HttpBridge {
        let host = Url::parse(&server.url())
            .unwrap()
            .host_str()
            .unwrap()
            .to_string();
        HttpBridge::new(NetworkPolicy::new([host])).unwrap()
    }

    #[tokio::test]
    async fn get_parses_json_and_appends_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("q".into(), "one piece".into()),
                mockito::Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .match_header("x-source", "jamra")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[1,2]}"#)
            .create_async()
            .await;

        let resp = bridge_for(&server)
            .get(HttpGetRequest {
                url: format!("{}/search", server.url()),
                headers: HashMap::from([("x-source".into(), "jamra".into())]),
                search_params: BTreeMap::from([
                    ("q".into(), json!("one piece")),
                    ("page".into(), json!(2)),
                ]),
                timeout_ms: Some(2_000),
            })
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!({"results": [1, 2]}));
    }

    #[tokio::test]
    async fn get_returns_text_for_html() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/chapter")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html></html>")
            .create_async()
            .await;

        let resp = bridge_for(&server)
            .get(HttpGetRequest {
                url: format!("{}/chapter", server.url()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.body, json!("<html></html>"));
    }

    #[tokio::test]
    async fn non_success_status_is_domain_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let err = bridge_for(&server)
            .get(HttpGetRequest {
                url: format!("{}/missing", server.url()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(!err.is_validation());
        assert!(err.to_string().contains("failed with status 404"));
    }

    #[tokio::test]
    async fn denied_host_never_hits_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .expect(0)
            .create_async()
            .await;

        let bridge = HttpBridge::new(NetworkPolicy::new(["example.org"])).unwrap();
        let err = bridge
            .get(HttpGetRequest {
                url: server.url(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(err.is_validation());
        mock.assert_async().await;
    }
}
