//! Persistence trait for extension records.

use async_trait::async_trait;

use crate::{Result, manifest::ExtensionRecord};

/// Keyed store of extension records. All operations are idempotent by id;
/// `list` carries no ordering guarantee.
#[async_trait]
pub trait ExtensionRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<ExtensionRecord>>;
    async fn find_by_id(&self, id: &str) -> Result<Option<ExtensionRecord>>;
    /// Insert or replace the record with the same id.
    async fn upsert(&self, record: &ExtensionRecord) -> Result<()>;
    /// Fails with a validation error when no record has this id.
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()>;
    /// Returns whether a record was removed.
    async fn remove(&self, id: &str) -> Result<bool>;
}
