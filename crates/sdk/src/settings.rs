//! Typed access to the loosely typed settings object a source receives.

use std::{collections::HashMap, sync::LazyLock};

use {
    regex::Regex,
    serde_json::{Map, Value},
};

static NUMBER_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").ok()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct NumberSetting {
    pub default: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Truncate toward zero before clamping.
    pub integer: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StringSetting {
    pub default: Option<String>,
    pub allow_empty: bool,
    /// Returning `None` or an empty string falls back to `default`.
    pub normalize: Option<fn(&str) -> Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct BooleanSetting {
    pub default: Option<bool>,
    /// Extra raw values read as `true`.
    pub truthy: Vec<Value>,
    pub falsy: Vec<Value>,
}

/// Declares the settings a source reads, coercing each raw value once.
///
/// ```
/// use jamra_sdk::settings::{NumberSetting, SettingsBinder};
///
/// let raw = serde_json::json!({ "concurrency": "12" });
/// let settings = SettingsBinder::from_value(&raw)
///     .number("concurrency", NumberSetting { max: Some(8.0), ..Default::default() })
///     .result();
/// assert_eq!(settings.number("concurrency"), Some(8.0));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SettingsBinder {
    source: Map<String, Value>,
    resolved: HashMap<String, Value>,
}

impl SettingsBinder {
    /// Non-object input is treated as no settings.
    #[must_use]
    pub fn from_value(values: &Value) -> Self {
        Self {
            source: values.as_object().cloned().unwrap_or_default(),
            resolved: HashMap::new(),
        }
    }

    #[must_use]
    pub fn number(mut self, key: &str, options: NumberSetting) -> Self {
        let value = resolve_number(self.source.get(key), &options);
        self.resolved.insert(key.to_string(), number_value(value));
        self
    }

    #[must_use]
    pub fn string(mut self, key: &str, options: StringSetting) -> Self {
        let value = resolve_string(self.source.get(key), &options);
        self.resolved
            .insert(key.to_string(), value.map_or(Value::Null, Value::String));
        self
    }

    #[must_use]
    pub fn boolean(mut self, key: &str, options: BooleanSetting) -> Self {
        let value = resolve_boolean(self.source.get(key), &options);
        self.resolved
            .insert(key.to_string(), value.map_or(Value::Null, Value::Bool));
        self
    }

    /// Replace a setting with `f(current)`, where `current` is the resolved
    /// value if any, else the raw one.
    #[must_use]
    pub fn with_override(mut self, key: &str, f: impl FnOnce(Option<&Value>) -> Value) -> Self {
        let current = self.resolved.get(key).or_else(|| self.source.get(key));
        let value = f(current);
        self.resolved.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn result(self) -> ResolvedSettings {
        ResolvedSettings {
            raw: self.source,
            resolved: self.resolved,
        }
    }
}

/// Snapshot produced by [`SettingsBinder::result`]. Keys that were never
/// declared are coerced from the raw value with default options.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSettings {
    raw: Map<String, Value>,
    resolved: HashMap<String, Value>,
}

impl ResolvedSettings {
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.resolved.get(key) {
            Some(Value::Null) => None,
            Some(value) => Some(value),
            None => self.raw.get(key),
        }
    }

    #[must_use]
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.resolved.get(key) {
            Some(value) => value.as_f64().filter(|n| n.is_finite()),
            None => resolve_number(self.raw.get(key), &NumberSetting::default()),
        }
    }

    #[must_use]
    pub fn string(&self, key: &str) -> Option<String> {
        match self.resolved.get(key) {
            Some(value) => value.as_str().filter(|s| !s.is_empty()).map(str::to_string),
            None => resolve_string(self.raw.get(key), &StringSetting::default()),
        }
    }

    #[must_use]
    pub fn boolean(&self, key: &str) -> Option<bool> {
        match self.resolved.get(key) {
            Some(value) => value.as_bool(),
            None => resolve_boolean(self.raw.get(key), &BooleanSetting::default()),
        }
    }

    #[must_use]
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }
}

fn number_value(value: Option<f64>) -> Value {
    value
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Leading numeric prefix, so `"12px"` reads as 12.
fn parse_number_prefix(raw: &str) -> Option<f64> {
    let re = NUMBER_PREFIX.as_ref()?;
    let prefix = re.find(raw.trim_start())?.as_str();
    prefix.parse().ok()
}

fn resolve_number(raw: Option<&Value>, options: &NumberSetting) -> Option<f64> {
    let parsed = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number_prefix(s),
        _ => None,
    }
    .filter(|n| n.is_finite());

    let mut value = parsed.or(options.default)?;
    if options.integer {
        value = value.trunc();
    }
    if let Some(min) = options.min {
        value = value.max(min);
    }
    if let Some(max) = options.max {
        value = value.min(max);
    }
    Some(value)
}

fn resolve_string(raw: Option<&Value>, options: &StringSetting) -> Option<String> {
    let Some(Value::String(raw)) = raw else {
        return options.default.clone();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() && !options.allow_empty {
        return options.default.clone();
    }
    let normalized = match options.normalize {
        Some(normalize) => normalize(trimmed),
        None => Some(trimmed.to_string()),
    };
    match normalized {
        Some(value) if !value.is_empty() => Some(value),
        _ => options.default.clone(),
    }
}

fn resolve_boolean(raw: Option<&Value>, options: &BooleanSetting) -> Option<bool> {
    match raw {
        Some(Value::Bool(b)) => return Some(*b),
        Some(Value::Number(n)) if n.as_f64() == Some(1.0) => return Some(true),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => return Some(false),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => return Some(true),
            "false" | "0" => return Some(false),
            _ => {},
        },
        _ => {},
    }
    if let Some(raw) = raw {
        if options.truthy.contains(raw) {
            return Some(true);
        }
        if options.falsy.contains(raw) {
            return Some(false);
        }
    }
    options.default
}
