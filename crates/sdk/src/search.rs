//! Normalizes the free-form filters a search request carries into the
//! state a source builds its query from.

use std::collections::HashSet;

use serde_json::{Map, Value};

/// How a raw filter value is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterKind {
    /// Trimmed string.
    Text,
    /// One of `values`, returned in its canonical spelling.
    OneOf {
        values: Vec<String>,
        case_insensitive: bool,
    },
    /// An array of strings or a delimited string. Blank entries are dropped.
    List { delimiter: String, dedupe: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    /// Dotted path the value is written to in the filter state.
    pub key: String,
    pub kind: FilterKind,
    /// Raw keys to read instead of `key`, first present wins.
    pub aliases: Vec<String>,
    pub default: Option<Value>,
    pub allow_empty: bool,
}

impl FilterDescriptor {
    fn with_kind(key: &str, kind: FilterKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
            aliases: Vec::new(),
            default: None,
            allow_empty: false,
        }
    }

    #[must_use]
    pub fn text(key: &str) -> Self {
        Self::with_kind(key, FilterKind::Text)
    }

    #[must_use]
    pub fn one_of(key: &str, values: &[&str]) -> Self {
        Self::with_kind(key, FilterKind::OneOf {
            values: values.iter().map(|v| (*v).to_string()).collect(),
            case_insensitive: false,
        })
    }

    #[must_use]
    pub fn list(key: &str) -> Self {
        Self::with_kind(key, FilterKind::List {
            delimiter: ",".into(),
            dedupe: true,
        })
    }

    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    #[must_use]
    pub fn case_insensitive(mut self) -> Self {
        if let FilterKind::OneOf {
            case_insensitive, ..
        } = &mut self.kind
        {
            *case_insensitive = true;
        }
        self
    }

    #[must_use]
    pub fn delimiter(mut self, value: &str) -> Self {
        if let FilterKind::List { delimiter, .. } = &mut self.kind {
            *delimiter = value.to_string();
        }
        self
    }

    #[must_use]
    pub fn keep_duplicates(mut self) -> Self {
        if let FilterKind::List { dedupe, .. } = &mut self.kind {
            *dedupe = false;
        }
        self
    }

    fn raw_value<'a>(&self, raw: &'a Map<String, Value>) -> Option<&'a Value> {
        if self.aliases.is_empty() {
            raw.get(&self.key)
        } else {
            self.aliases.iter().find_map(|alias| raw.get(alias))
        }
    }

    fn resolve(&self, raw: Option<&Value>) -> Option<Value> {
        let value = match (&self.kind, raw) {
            (FilterKind::Text, Some(Value::String(s))) => {
                let trimmed = s.trim();
                (!trimmed.is_empty() || self.allow_empty).then(|| Value::from(trimmed))
            },
            (
                FilterKind::OneOf {
                    values,
                    case_insensitive,
                },
                Some(Value::String(s)),
            ) => {
                let candidate = s.trim();
                values
                    .iter()
                    .find(|v| {
                        if *case_insensitive {
                            v.to_lowercase() == candidate.to_lowercase()
                        } else {
                            v.as_str() == candidate
                        }
                    })
                    .map(|v| Value::from(v.as_str()))
            },
            (FilterKind::List { delimiter, dedupe }, Some(raw)) => {
                list_values(raw, delimiter, *dedupe).map(Value::from)
            },
            _ => None,
        };
        value.or_else(|| self.default.clone())
    }
}

fn list_values(raw: &Value, delimiter: &str, dedupe: bool) -> Option<Vec<String>> {
    let parts: Vec<&str> = match raw {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(s) => s.split(delimiter).collect(),
        _ => return None,
    };

    let mut seen = HashSet::new();
    let values: Vec<String> = parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| !dedupe || seen.insert(*part))
        .map(str::to_string)
        .collect();
    (!values.is_empty()).then_some(values)
}

/// Write `value` at a dotted `path`, replacing non-object intermediates.
fn assign_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some(last) = segments.pop() else {
        return;
    };
    let mut cursor = target;
    for segment in segments {
        let slot = cursor
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        cursor = next;
    }
    cursor.insert(last.to_string(), value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub mode: String,
    pub query: String,
    pub filters: Value,
}

/// Picks the listing mode for a request and folds its raw filters into a
/// state object seeded from `initial_state`.
#[derive(Debug, Clone)]
pub struct SearchController {
    modes: Vec<String>,
    default_mode: String,
    hot_mode: Option<String>,
    search_mode: Option<String>,
    initial_state: Map<String, Value>,
    filters: Vec<FilterDescriptor>,
}

impl SearchController {
    #[must_use]
    pub fn new(modes: &[&str], default_mode: &str) -> Self {
        Self {
            modes: modes.iter().map(|m| (*m).to_string()).collect(),
            default_mode: default_mode.to_string(),
            hot_mode: None,
            search_mode: None,
            initial_state: Map::new(),
            filters: Vec::new(),
        }
    }

    /// Mode used for an empty query; see [`Self::should_hydrate_hot`].
    #[must_use]
    pub fn hot_mode(mut self, mode: &str) -> Self {
        self.hot_mode = Some(mode.to_string());
        self
    }

    /// Mode forced whenever the query is non-empty.
    #[must_use]
    pub fn search_mode(mut self, mode: &str) -> Self {
        self.search_mode = Some(mode.to_string());
        self
    }

    /// Non-object input is ignored.
    #[must_use]
    pub fn initial_state(mut self, state: Value) -> Self {
        if let Value::Object(map) = state {
            self.initial_state = map;
        }
        self
    }

    #[must_use]
    pub fn filter(mut self, descriptor: FilterDescriptor) -> Self {
        self.filters.push(descriptor);
        self
    }

    #[must_use]
    pub fn normalize(&self, raw: Option<&Value>, query: Option<&str>) -> SearchRequest {
        let empty = Map::new();
        let raw = raw.and_then(Value::as_object).unwrap_or(&empty);
        let query = query.map(str::trim).unwrap_or_default().to_string();
        let mode = self.derive_mode(&query, raw.get("mode").and_then(Value::as_str));

        let mut state = self.initial_state.clone();
        for descriptor in &self.filters {
            if let Some(value) = descriptor.resolve(descriptor.raw_value(raw)) {
                assign_path(&mut state, &descriptor.key, value);
            }
        }

        SearchRequest {
            mode,
            query,
            filters: Value::Object(state),
        }
    }

    /// True for an empty query in hot mode, where the source serves its
    /// trending list instead of searching.
    #[must_use]
    pub fn should_hydrate_hot(&self, request: &SearchRequest) -> bool {
        self.hot_mode
            .as_deref()
            .is_some_and(|hot| request.mode == hot && request.query.is_empty())
    }

    fn derive_mode(&self, query: &str, raw_mode: Option<&str>) -> String {
        if !query.is_empty()
            && let Some(search) = &self.search_mode
        {
            return self.known_or_default(search);
        }
        if let Some(raw) = raw_mode
            && self.modes.iter().any(|m| m == raw)
        {
            return raw.to_string();
        }
        if query.is_empty()
            && let Some(hot) = &self.hot_mode
        {
            return self.known_or_default(hot);
        }
        self.default_mode.clone()
    }

    fn known_or_default(&self, mode: &str) -> String {
        if self.modes.iter().any(|m| m == mode) {
            mode.to_string()
        } else {
            self.default_mode.clone()
        }
    }
}
