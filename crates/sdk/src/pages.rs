use std::{collections::BTreeMap, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    url::Url,
};

use crate::{
    error::{Error, Result},
    html::ScraperClient,
};

/// One image of a chapter, in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub index: u32,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Page {
    #[must_use]
    pub fn new(index: u32, image_url: impl Into<String>) -> Self {
        Self {
            index,
            image_url: image_url.into(),
            headers: None,
            width: None,
            height: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl PageRequest {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

pub type PageTransformer = Box<dyn Fn(Vec<Page>) -> Vec<Page> + Send + Sync>;

type BuildRequest = Box<dyn Fn(&str) -> PageRequest + Send + Sync>;
type Parser = Box<dyn Fn(&str, &str) -> Vec<Page> + Send + Sync>;

/// Request → fetch → parse → transform, for a chapter's page list.
pub struct PagePipeline {
    client: Arc<dyn ScraperClient>,
    build_request: BuildRequest,
    parser: Parser,
    transformers: Vec<PageTransformer>,
}

impl PagePipeline {
    /// `parser` receives the fetched HTML and the chapter id.
    pub fn new(
        client: Arc<dyn ScraperClient>,
        build_request: impl Fn(&str) -> PageRequest + Send + Sync + 'static,
        parser: impl Fn(&str, &str) -> Vec<Page> + Send + Sync + 'static,
    ) -> Self {
        Self {
            client,
            build_request: Box::new(build_request),
            parser: Box::new(parser),
            transformers: Vec::new(),
        }
    }

    /// Transformers run in the order they are added.
    #[must_use]
    pub fn with_transformer(mut self, transformer: PageTransformer) -> Self {
        self.transformers.push(transformer);
        self
    }

    pub async fn fetch_pages(&self, chapter_id: &str) -> Result<Vec<Page>> {
        let request = (self.build_request)(chapter_id);
        let html = self
            .client
            .get(&request.path, &request.params, &request.headers)
            .await?;

        let mut pages = (self.parser)(&html, chapter_id);
        if pages.is_empty() {
            return Err(Error::domain(
                "No pages were returned for the requested chapter",
            ));
        }
        for transformer in &self.transformers {
            pages = transformer(pages);
        }
        Ok(pages)
    }
}

/// Point every page at `host`, e.g. a faster CDN mirror. A blank host
/// leaves pages untouched, as do image URLs that fail to parse.
#[must_use]
pub fn rewrite_hosts(host: &str) -> PageTransformer {
    let host = host.trim().to_string();
    if host.is_empty() {
        return Box::new(|pages| pages);
    }
    Box::new(move |pages| {
        pages
            .into_iter()
            .map(|mut page| {
                if let Ok(mut url) = Url::parse(&page.image_url)
                    && url.set_host(Some(&host)).is_ok()
                {
                    page.image_url = url.to_string();
                }
                page
            })
            .collect()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, async_trait::async_trait, std::sync::Mutex};

    /// Serves a fixed body and records requested paths.
    struct StaticClient {
        body: String,
        requests: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    #[async_trait]
    impl ScraperClient for StaticClient {
        async fn get(
            &self,
            path: &str,
            params: &BTreeMap<String, String>,
            _headers: &BTreeMap<String, String>,
        ) -> Result<String> {
            self.requests
                .lock()
                .unwrap()
                .push((path.to_string(), params.clone()));
            Ok(self.body.clone())
        }
    }

    fn parse_imgs(html: &str, _chapter: &str) -> Vec<Page> {
        html.split("src=\"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .enumerate()
            .map(|(i, src)| Page::new(i as u32, src))
            .collect()
    }

    fn client(body: &str) -> Arc<StaticClient> {
        Arc::new(StaticClient {
            body: body.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn fetches_parses_and_transforms() {
        let client = client(
            r#"<img src="https://scans.example.com/a/1.png"><img src="https://scans.example.com/a/2.png">"#,
        );
        let pipeline = PagePipeline::new(
            client.clone(),
            |chapter| PageRequest::new(format!("/chapters/{chapter}/images")).param("is_prev", "False"),
            parse_imgs,
        )
        .with_transformer(rewrite_hosts("cdn.example.net"));

        let pages = pipeline.fetch_pages("01J76").await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].image_url, "https://cdn.example.net/a/1.png");
        assert_eq!(pages[1].index, 1);

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0].0, "/chapters/01J76/images");
        assert_eq!(requests[0].1.get("is_prev").unwrap(), "False");
    }

    #[tokio::test]
    async fn empty_parse_is_an_error() {
        let pipeline = PagePipeline::new(
            client("<p>nothing</p>"),
            |chapter| PageRequest::new(chapter),
            parse_imgs,
        );
        let err = pipeline.fetch_pages("c1").await.unwrap_err();
        assert_eq!(err.to_string(), "No pages were returned for the requested chapter");
    }

    #[test]
    fn blank_host_is_identity() {
        let pages = vec![Page::new(0, "https://a.example/1.png"), Page::new(1, "not a url")];
        assert_eq!(rewrite_hosts("  ")(pages.clone()), pages);
        let rewritten = rewrite_hosts("b.example")(pages);
        assert_eq!(rewritten[0].image_url, "https://b.example/1.png");
        assert_eq!(rewritten[1].image_url, "not a url");
    }
}
