//! Stable chapter slugs for a series, with the slug → remote id mapping the
//! source needs to fetch pages later.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::slug::normalize_or;

const CHAPTER_FALLBACK: &str = "chapter";
const DEFAULT_LANGUAGE: &str = "en";

/// A chapter as returned to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<f64>,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanlator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
}

/// What a source scraped for one chapter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChapterSource {
    pub remote_id: String,
    pub title: Option<String>,
    pub chapter_number: Option<f64>,
    pub published_at: Option<String>,
    pub language: Option<String>,
    pub volume: Option<f64>,
    pub scanlator: Option<String>,
    pub pages: Option<u32>,
}

impl ChapterSource {
    #[must_use]
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            ..Self::default()
        }
    }
}

/// Input handed to a custom slug strategy.
#[derive(Debug, Clone, Copy)]
pub struct SlugInput<'a> {
    pub series_slug: &'a str,
    pub title: Option<&'a str>,
    pub chapter_number: Option<f64>,
    pub remote_id: &'a str,
}

type DeriveSlug = Box<dyn Fn(SlugInput<'_>) -> String + Send + Sync>;

/// Turns scraped chapters into [`Chapter`]s with slugs unique within their
/// series, remembering which remote id each slug stands for.
#[derive(Default)]
pub struct ChapterListBuilder {
    default_language: Option<String>,
    derive: Option<DeriveSlug>,
    remote_ids: HashMap<String, String>,
}

impl ChapterListBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = Some(language.into());
        self
    }

    /// Replace the default slug source (number, then title, then remote id).
    #[must_use]
    pub fn with_slug_strategy(
        mut self,
        derive: impl Fn(SlugInput<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.derive = Some(Box::new(derive));
        self
    }

    /// Build the chapter list for `series_slug`. Mappings from a previous
    /// build of the same series are dropped first.
    pub fn build(&mut self, series_slug: &str, sources: &[ChapterSource]) -> Vec<Chapter> {
        let series = normalize(series_slug);
        self.clear_series(&series);

        let mut used = HashSet::new();
        let mut chapters = Vec::with_capacity(sources.len());
        for source in sources {
            let slug = self.unique_slug(&series, source, &mut used);
            chapters.push(Chapter {
                id: slug.clone(),
                title: source.title.clone().unwrap_or_else(|| slug.clone()),
                chapter_number: source.chapter_number,
                language: source
                    .language
                    .clone()
                    .or_else(|| self.default_language.clone())
                    .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
                published_at: source.published_at.clone(),
                volume: source.volume,
                scanlator: source.scanlator.clone(),
                pages: source.pages,
            });
            self.register(&series, &slug, &source.remote_id);
        }
        chapters
    }

    #[must_use]
    pub fn remote_chapter_id(&self, series_slug: &str, chapter_slug: &str) -> Option<&str> {
        self.remote_ids
            .get(&key(series_slug, chapter_slug))
            .map(String::as_str)
    }

    pub fn register(&mut self, series_slug: &str, chapter_slug: &str, remote_id: &str) {
        self.remote_ids
            .insert(key(series_slug, chapter_slug), remote_id.to_string());
    }

    pub fn clear_series(&mut self, series_slug: &str) {
        let prefix = format!("{}::", normalize(series_slug));
        self.remote_ids.retain(|k, _| !k.starts_with(&prefix));
    }

    fn unique_slug(
        &self,
        series: &str,
        source: &ChapterSource,
        used: &mut HashSet<String>,
    ) -> String {
        let base_value = match &self.derive {
            Some(derive) => derive(SlugInput {
                series_slug: series,
                title: source.title.as_deref(),
                chapter_number: source.chapter_number,
                remote_id: &source.remote_id,
            }),
            None => default_slug_value(source),
        };
        let base = normalize(&base_value);

        let mut slug = base.clone();
        let mut counter = 2;
        while used.contains(&slug) || self.remote_ids.contains_key(&key(series, &slug)) {
            slug = format!("{base}-{counter}");
            counter += 1;
        }
        used.insert(slug.clone());
        slug
    }
}

fn normalize(value: &str) -> String {
    normalize_or(value, CHAPTER_FALLBACK)
}

fn key(series_slug: &str, chapter_slug: &str) -> String {
    format!("{}::{}", normalize(series_slug), normalize(chapter_slug))
}

fn default_slug_value(source: &ChapterSource) -> String {
    if let Some(number) = source.chapter_number {
        return format_number(number);
    }
    if let Some(title) = &source.title {
        let stripped = strip_first_chapter_word(title);
        let stripped = stripped.trim();
        if !stripped.is_empty() {
            return stripped.to_string();
        }
    }
    source.remote_id.clone()
}

/// `10.0` → `"10"`, `10.5` → `"10.5"`.
fn format_number(value: f64) -> String {
    value.to_string()
}

/// Remove the first case-insensitive "chapter" from a title.
fn strip_first_chapter_word(title: &str) -> String {
    let lowered = title.to_ascii_lowercase();
    match lowered.find(CHAPTER_FALLBACK) {
        Some(at) => format!("{}{}", &title[..at], &title[at + CHAPTER_FALLBACK.len()..]),
        None => title.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn numbered(remote_id: &str, number: f64) -> ChapterSource {
        ChapterSource {
            chapter_number: Some(number),
            ..ChapterSource::new(remote_id)
        }
    }

    fn titled(remote_id: &str, title: &str) -> ChapterSource {
        ChapterSource {
            title: Some(title.to_string()),
            ..ChapterSource::new(remote_id)
        }
    }

    #[test]
    fn slugs_follow_number_then_title_then_remote_id() {
        let mut builder = ChapterListBuilder::new();
        let chapters = builder.build("Solo Leveling", &[
            numbered("r1", 10.0),
            numbered("r2", 10.5),
            titled("r3", "Chapter Prologue"),
            ChapterSource::new("XYZ_9"),
        ]);
        let ids: Vec<&str> = chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["10", "10-5", "prologue", "xyz-9"]);
        assert_eq!(chapters[0].title, "10");
        assert_eq!(chapters[2].title, "Chapter Prologue");
        assert_eq!(chapters[0].language, "en");

        assert_eq!(builder.remote_chapter_id("solo-leveling", "10-5"), Some("r2"));
        assert_eq!(builder.remote_chapter_id("Solo Leveling", "prologue"), Some("r3"));
    }

    #[test]
    fn duplicate_slugs_get_counters() {
        let mut builder = ChapterListBuilder::new().with_default_language("fr");
        let chapters = builder.build("s", &[
            numbered("a", 1.0),
            numbered("b", 1.0),
            numbered("c", 1.0),
        ]);
        let ids: Vec<&str> = chapters.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["1", "1-2", "1-3"]);
        assert_eq!(builder.remote_chapter_id("s", "1-3"), Some("c"));
        assert!(chapters.iter().all(|c| c.language == "fr"));
    }

    #[test]
    fn rebuilding_a_series_replaces_its_mappings_only() {
        let mut builder = ChapterListBuilder::new();
        builder.build("one", &[numbered("old", 1.0), numbered("gone", 2.0)]);
        builder.build("two", &[numbered("other", 1.0)]);

        let chapters = builder.build("one", &[numbered("new", 1.0)]);
        assert_eq!(chapters[0].id, "1");
        assert_eq!(builder.remote_chapter_id("one", "1"), Some("new"));
        assert_eq!(builder.remote_chapter_id("one", "2"), None);
        assert_eq!(builder.remote_chapter_id("two", "1"), Some("other"));
    }

    #[test]
    fn custom_strategy_and_empty_values() {
        let mut builder = ChapterListBuilder::new()
            .with_slug_strategy(|input| format!("{}-{}", input.series_slug, input.remote_id));
        let chapters = builder.build("Berserk", &[ChapterSource::new("c1")]);
        assert_eq!(chapters[0].id, "berserk-c1");

        let mut builder = ChapterListBuilder::new().with_slug_strategy(|_| "!!!".into());
        let chapters = builder.build("x", &[ChapterSource::new("a")]);
        assert_eq!(chapters[0].id, "chapter");
    }

    #[test]
    fn chapters_serialize_camel_case() {
        let mut builder = ChapterListBuilder::new();
        let chapters = builder.build("s", &[numbered("r", 3.0)]);
        let json = serde_json::to_value(&chapters[0]).unwrap();
        assert_eq!(json["chapterNumber"], 3.0);
        assert!(json.get("publishedAt").is_none());
    }
}
