//! In-memory registry for tests and ephemeral hosts.

use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{Error, Result, manifest::ExtensionRecord, registry::ExtensionRegistry};

/// `HashMap` behind an async lock. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryRegistry {
    records: RwLock<HashMap<String, ExtensionRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExtensionRegistry for InMemoryRegistry {
    async fn list(&self) -> Result<Vec<ExtensionRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn upsert(&self, record: &ExtensionRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::validation(format!("extension {id} not found")))?;
        record.enabled = enabled;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }
}
