//! Small parsing helpers shared by scraper sources.

use std::{fmt, sync::LazyLock};

use {
    regex::Regex,
    serde::{Deserialize, Serialize},
    url::Url,
};

use crate::slug::normalize_slug;

static CHAPTER_NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)").ok());

fn with_trailing_slash(value: &str) -> String {
    if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{value}/")
    }
}

/// Resolve `value` against `base_url`. Unparseable input is returned as-is.
#[must_use]
pub fn to_absolute_url(value: &str, base_url: &str) -> String {
    Url::parse(&with_trailing_slash(base_url))
        .and_then(|base| base.join(value))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| value.to_string())
}

/// Slug from the last path segment of a series URL. Purely numeric
/// segments are ids, not slugs, unless `allow_numeric` is set.
#[must_use]
pub fn extract_slug_from_url(value: &str, base_url: Option<&str>, allow_numeric: bool) -> Option<String> {
    let url = match base_url {
        Some(base) => Url::parse(&with_trailing_slash(base)).and_then(|b| b.join(value)),
        None => Url::parse(value),
    }
    .ok()?;
    let last = url.path_segments()?.filter(|s| !s.is_empty()).next_back()?;
    if !allow_numeric && last.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let decoded = percent_decode(last);
    Some(normalize_slug(&decoded))
}

fn percent_decode(segment: &str) -> String {
    url::form_urlencoded::parse(format!("x={}", segment.replace('+', "%2B")).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| segment.to_string())
}

/// First number in a chapter title, e.g. `"Chapter 10.5"` gives `10.5`.
#[must_use]
pub fn extract_chapter_number(title: &str) -> Option<f64> {
    let re = CHAPTER_NUMBER.as_ref()?;
    let value: f64 = re.captures(title)?.get(1)?.as_str().parse().ok()?;
    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
}

impl fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Hiatus => "hiatus",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Map the status wording sites use onto [`SeriesStatus`].
#[must_use]
pub fn normalize_status(value: &str) -> Option<SeriesStatus> {
    match value.trim().to_lowercase().as_str() {
        "ongoing" => Some(SeriesStatus::Ongoing),
        "complete" | "completed" => Some(SeriesStatus::Completed),
        "hiatus" => Some(SeriesStatus::Hiatus),
        "cancelled" | "canceled" => Some(SeriesStatus::Cancelled),
        _ => None,
    }
}
