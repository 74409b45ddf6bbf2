//! Executes plugin lifecycle methods in per-extension worker processes.
//!
//! Each extension gets one worker, spawned lazily on first use and kept
//! until [`ExtensionRuntime::dispose`] or a timeout kills it. Calls to the
//! same extension are serialised; calls to different extensions run in
//! parallel.

mod settings;
mod worker;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    serde_json::Value,
    tokio::sync::{Mutex as AsyncMutex, RwLock},
    tracing::{debug, info, warn},
};

pub use {
    settings::{InMemorySettingsStore, SettingsStore, UnavailableSettingsStore},
    worker::WorkerCommand,
};

use {
    crate::{
        error::{Error, Result},
        loader::ExtensionLoader,
        manifest::ExtensionRecord,
        network::HttpBridge,
    },
    worker::Worker,
};

/// Lifecycle methods with host-side meaning.
pub mod methods {
    pub const INIT: &str = "init";
    pub const DISPOSE: &str = "dispose";
    pub const SEARCH: &str = "search";
    pub const GET_MANGA_DETAILS: &str = "getMangaDetails";
    pub const GET_CHAPTERS: &str = "getChapters";
    pub const GET_PAGES: &str = "getPages";
    pub const GET_SETTINGS: &str = "getSettings";
    pub const ON_SETTINGS_CHANGE: &str = "onSettingsChange";
}

#[async_trait]
pub trait ExtensionRuntime: Send + Sync {
    /// Warm the extension: compile, start its context and run `init`.
    /// No-op when a live context already exists.
    async fn initialise(&self, record: &ExtensionRecord) -> Result<()>;

    /// Invoke `method` with `payload`, bounded by `timeout` or the runtime
    /// default.
    async fn execute(
        &self,
        record: &ExtensionRecord,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value>;

    /// Tear down the live context. The next call starts a fresh one from
    /// whatever the loader returns.
    async fn dispose(&self, record: &ExtensionRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub command: WorkerCommand,
    pub default_timeout: Duration,
}

impl RuntimeOptions {
    pub fn from_config(config: &jamra_config::RuntimeConfig) -> Self {
        Self {
            command: WorkerCommand {
                program: config.command.clone(),
                args: config.args.clone(),
            },
            default_timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_config(&jamra_config::RuntimeConfig::default())
    }
}

type Slot = Arc<AsyncMutex<Option<Worker>>>;

pub struct ProcessRuntime {
    loader: Arc<dyn ExtensionLoader>,
    bridge: Arc<HttpBridge>,
    settings_store: Arc<dyn SettingsStore>,
    options: RuntimeOptions,
    slots: Mutex<HashMap<String, Slot>>,
    settings: RwLock<HashMap<String, Value>>,
}

impl ProcessRuntime {
    pub fn new(
        loader: Arc<dyn ExtensionLoader>,
        bridge: Arc<HttpBridge>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            loader,
            bridge,
            settings_store: Arc::new(UnavailableSettingsStore),
            options,
            slots: Mutex::new(HashMap::new()),
            settings: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = store;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.options.default_timeout
    }

    /// Whether a live worker exists for `extension_id`.
    pub async fn is_running(&self, extension_id: &str) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(extension_id)
            .cloned();
        match slot {
            Some(slot) => slot.lock().await.is_some(),
            None => false,
        }
    }

    /// Current settings for the extension, seeded from the settings store
    /// on first access.
    pub async fn settings(&self, record: &ExtensionRecord) -> Value {
        if let Some(values) = self.settings.read().await.get(&record.id) {
            return values.clone();
        }
        let seeded = match self.settings_store.load(&record.id).await {
            Ok(Some(values)) if values.is_object() => values,
            Ok(_) | Err(Error::NotImplemented { .. }) => Value::Object(Default::default()),
            Err(e) => {
                warn!(extension_id = %record.id, error = %e, "failed to load extension settings");
                Value::Object(Default::default())
            },
        };
        self.settings
            .write()
            .await
            .entry(record.id.clone())
            .or_insert(seeded)
            .clone()
    }

    async fn replace_settings(&self, record: &ExtensionRecord, values: &Value) {
        self.settings
            .write()
            .await
            .insert(record.id.clone(), values.clone());
        match self.settings_store.save(&record.id, values).await {
            Ok(()) => {},
            Err(Error::NotImplemented { feature }) => {
                debug!(extension_id = %record.id, %feature, "settings kept in memory only");
            },
            Err(e) => warn!(extension_id = %record.id, error = %e, "failed to persist extension settings"),
        }
    }

    fn slot(&self, extension_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(extension_id.to_string()).or_default())
    }

    async fn start_worker(&self, record: &ExtensionRecord) -> Result<Worker> {
        let source = self.loader.load_source(record).await?;
        let mut worker = Worker::spawn(&self.options.command, record)?;
        worker.load(record, &source, &self.bridge).await?;
        let settings = self.settings(record).await;
        worker
            .call(record, methods::INIT, &Value::Null, &settings, &self.bridge)
            .await?;
        info!(extension_id = %record.id, version = %record.version, "extension worker started");
        Ok(worker)
    }

    async fn ensure_worker<'a>(
        &self,
        slot: &'a mut Option<Worker>,
        record: &ExtensionRecord,
    ) -> Result<&'a mut Worker> {
        if slot.is_none() {
            *slot = Some(self.start_worker(record).await?);
        }
        slot.as_mut()
            .ok_or_else(|| Error::domain(format!("extension {} has no worker", record.id)))
    }

    /// Run `op` against the extension's worker under `timeout`, killing the
    /// worker if the budget runs out or it breaks.
    async fn with_worker(
        &self,
        record: &ExtensionRecord,
        method: &str,
        timeout: Duration,
        payload: &Value,
    ) -> Result<Value> {
        let slot = self.slot(&record.id);
        let mut guard = slot.lock().await;
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, async {
            let worker = self.ensure_worker(&mut guard, record).await?;
            if method == methods::INIT {
                return Ok(Value::Null);
            }
            let settings = self.settings(record).await;
            worker
                .call(record, method, payload, &settings, &self.bridge)
                .await
        })
        .await;

        match outcome {
            Ok(result) => {
                if guard.as_ref().is_some_and(Worker::is_broken)
                    && let Some(worker) = guard.take()
                {
                    warn!(extension_id = %record.id, method, "extension worker died; discarding it");
                    worker.kill().await;
                }
                debug!(
                    extension_id = %record.id,
                    method,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "extension call finished"
                );
                result
            },
            Err(_) => {
                if let Some(worker) = guard.take() {
                    worker.kill().await;
                }
                warn!(
                    extension_id = %record.id,
                    method,
                    timeout_ms = timeout.as_millis() as u64,
                    "extension call timed out; worker killed"
                );
                Err(Error::Timeout {
                    extension_id: record.id.clone(),
                    method: method.to_string(),
                    timeout,
                })
            },
        }
    }
}

#[async_trait]
impl ExtensionRuntime for ProcessRuntime {
    async fn initialise(&self, record: &ExtensionRecord) -> Result<()> {
        self.with_worker(record, methods::INIT, self.options.default_timeout, &Value::Null)
            .await
            .map(|_| ())
    }

    async fn execute(
        &self,
        record: &ExtensionRecord,
        method: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if method == methods::ON_SETTINGS_CHANGE && payload.is_object() {
            self.replace_settings(record, &payload).await;
        }
        let timeout = timeout.unwrap_or(self.options.default_timeout);
        self.with_worker(record, method, timeout, &payload).await
    }

    async fn dispose(&self, record: &ExtensionRecord) -> Result<()> {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&record.id);
        let Some(slot) = slot else {
            return Ok(());
        };
        let Some(mut worker) = slot.lock().await.take() else {
            return Ok(());
        };

        let settings = self.settings(record).await;
        match tokio::time::timeout(
            self.options.default_timeout,
            worker.call(record, methods::DISPOSE, &Value::Null, &settings, &self.bridge),
        )
        .await
        {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => warn!(extension_id = %record.id, error = %e, "extension dispose hook failed"),
            Err(_) => warn!(extension_id = %record.id, "extension dispose hook timed out"),
        }
        worker.kill().await;
        info!(extension_id = %record.id, "disposed extension worker");
        Ok(())
    }
}
