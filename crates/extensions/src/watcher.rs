//! Development hot reload.
//!
//! Watches the install directory and, for each changed extension, refreshes
//! its record, evicts its compiled code and disposes its live worker so the
//! next call runs fresh source. Reloads are coalesced per extension id:
//! while one is in flight for `foo`, further `foo` events are dropped, but
//! `bar` proceeds independently.

use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    bootstrap::{BootstrapReport, register_extension_dir},
    error::Result,
    loader::ExtensionLoader,
    manifest::MANIFEST_FILE,
    registry::ExtensionRegistry,
    runtime::ExtensionRuntime,
};

/// Settle delay before a burst of writes is reported.
pub const DEBOUNCE: Duration = Duration::from_millis(250);

const IGNORED_DIRS: &[&str] = &["dist", "out", "node_modules"];

/// What [`DevReloader::handle_path`] did with an event.
#[derive(Debug)]
pub enum ReloadOutcome {
    /// A reload task was spawned.
    Started(JoinHandle<()>),
    /// A reload for the same extension is already running.
    Skipped,
    /// The path does not belong to a watched extension.
    Ignored,
}

/// Removes the id from the in-flight set however the reload ends.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    extension_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.extension_id);
    }
}

#[derive(Clone)]
pub struct DevReloader {
    install_dir: PathBuf,
    registry: Arc<dyn ExtensionRegistry>,
    runtime: Arc<dyn ExtensionRuntime>,
    loader: Arc<dyn ExtensionLoader>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl DevReloader {
    pub fn new(
        install_dir: PathBuf,
        registry: Arc<dyn ExtensionRegistry>,
        runtime: Arc<dyn ExtensionRuntime>,
        loader: Arc<dyn ExtensionLoader>,
    ) -> Self {
        Self {
            install_dir,
            registry,
            runtime,
            loader,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Extension id owning `path`: the first segment below the install dir.
    /// `None` for the root itself, paths outside it, and ignored entries
    /// (hidden files, build output, dependencies).
    pub fn extension_id(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.install_dir).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            let Component::Normal(segment) = component else {
                return None;
            };
            let segment = segment.to_str()?;
            if segment.starts_with('.') || IGNORED_DIRS.contains(&segment) {
                return None;
            }
            segments.push(segment);
        }
        segments.first().map(|id| (*id).to_string())
    }

    /// Start a reload for the extension owning `path` unless one is running.
    pub fn handle_path(&self, path: &Path) -> ReloadOutcome {
        let Some(extension_id) = self.extension_id(path) else {
            return ReloadOutcome::Ignored;
        };

        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(extension_id.clone());
        if !inserted {
            debug!(extension_id = %extension_id, path = %path.display(), "reload already in flight; skipping");
            return ReloadOutcome::Skipped;
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            extension_id: extension_id.clone(),
        };
        let this = self.clone();
        let changed = path.to_path_buf();
        ReloadOutcome::Started(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = this.reload(&extension_id, &changed).await {
                warn!(extension_id = %extension_id, path = %changed.display(), error = %e, "failed to hot reload extension");
            }
        }))
    }

    async fn reload(&self, extension_id: &str, changed: &Path) -> Result<()> {
        let mut lookup_id = extension_id.to_string();
        if changed.file_name().is_some_and(|n| n == MANIFEST_FILE) {
            let mut report = BootstrapReport::default();
            if let Some(registered) = register_extension_dir(
                &self.install_dir.join(extension_id),
                self.registry.as_ref(),
                self.loader.as_ref(),
                &mut report,
            )
            .await
            {
                lookup_id = registered;
            }
        }

        let Some(record) = self.registry.find_by_id(&lookup_id).await? else {
            warn!(extension_id, path = %changed.display(), "extension change detected but no record found");
            return Ok(());
        };

        self.loader.unload(&record).await;
        self.runtime.dispose(&record).await?;
        info!(extension_id, path = %changed.display(), "reloaded extension after source change");
        Ok(())
    }
}

/// Live filesystem watch feeding a [`DevReloader`]. Dropping it stops
/// watching.
pub struct DevWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    task: JoinHandle<()>,
}

impl DevWatcher {
    /// Watch the reloader's install directory when `development` is set;
    /// returns `None` otherwise.
    pub fn enable(development: bool, reloader: DevReloader) -> Result<Option<Self>> {
        if !development {
            return Ok(None);
        }

        let install_dir = reloader.install_dir.clone();
        std::fs::create_dir_all(&install_dir)?;

        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut debouncer = new_debouncer(DEBOUNCE, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let mut seen = HashSet::new();
                    for event in events {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }
                        for path in &event.paths {
                            if seen.insert(path.clone()) {
                                let _ = tx.send(path.clone());
                            }
                        }
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "extension watcher error");
                    }
                },
            }
        })?;
        debouncer.watch(&install_dir, RecursiveMode::Recursive)?;

        let task = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                reloader.handle_path(&path);
            }
        });

        info!(install_dir = %install_dir.display(), "watching extension sources for live reload");
        Ok(Some(Self {
            _debouncer: debouncer,
            task,
        }))
    }
}

impl Drop for DevWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
