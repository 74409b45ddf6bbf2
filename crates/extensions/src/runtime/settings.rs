//! Persistence seam for per-extension settings.

use std::collections::HashMap;

use {async_trait::async_trait, serde_json::Value, tokio::sync::RwLock};

use crate::error::{Error, Result};

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Persisted settings for `extension_id`, if any.
    async fn load(&self, extension_id: &str) -> Result<Option<Value>>;
    async fn save(&self, extension_id: &str, settings: &Value) -> Result<()>;
}

/// Store used until settings persistence exists. Every call reports
/// [`Error::NotImplemented`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSettingsStore;

#[async_trait]
impl SettingsStore for UnavailableSettingsStore {
    async fn load(&self, _extension_id: &str) -> Result<Option<Value>> {
        Err(Error::not_implemented("extension settings persistence"))
    }

    async fn save(&self, _extension_id: &str, _settings: &Value) -> Result<()> {
        Err(Error::not_implemented("extension settings persistence"))
    }
}

#[derive(Default)]
pub struct InMemorySettingsStore {
    values: RwLock<HashMap<String, Value>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load(&self, extension_id: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(extension_id).cloned())
    }

    async fn save(&self, extension_id: &str, settings: &Value) -> Result<()> {
        self.values
            .write()
            .await
            .insert(extension_id.to_string(), settings.clone());
        Ok(())
    }
}
