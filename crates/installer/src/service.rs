//! Install orchestration: job queueing, bounded parallelism and the
//! fetch → unpack → compile → register pipeline.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    jamra_config::JamraConfig,
    jamra_extensions::{
        ExtensionHost,
        loader::ExtensionLoader,
        manifest::ExtensionRecord,
        registry::ExtensionRegistry,
        runtime::ExtensionRuntime,
    },
    serde::Deserialize,
    sqlx::SqlitePool,
    tokio::sync::Semaphore,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    fetch::{RepositoryFetcher, RepositorySource},
    index::{IndexEntry, RepositoryIndex},
    jobs::{InstallJob, InstallStage, JobStore},
    jobs_sqlite::SqliteJobStore,
    package::{self, sha256_hex},
    source::{self, DEFAULT_BRANCH},
    validate::{check_extension_id, validate_package},
};

const FINAL_WRITE_ATTEMPTS: u32 = 3;
const FINAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// Body of an install request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub repository_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Ids to install. Empty means "the only extension in the index".
    #[serde(default)]
    pub extension_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InstallerOptions {
    pub install_dir: PathBuf,
    /// Parent of the per-job staging directories.
    pub temp_dir: PathBuf,
    pub concurrency: usize,
}

impl InstallerOptions {
    #[must_use]
    pub fn from_config(config: &JamraConfig) -> Self {
        Self {
            install_dir: config.install_dir(),
            temp_dir: config.installer_temp_dir(),
            concurrency: config.installer.concurrency,
        }
    }
}

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct InstallerService {
    source: Arc<dyn RepositorySource>,
    jobs: Arc<dyn JobStore>,
    registry: Arc<dyn ExtensionRegistry>,
    loader: Arc<dyn ExtensionLoader>,
    runtime: Option<Arc<dyn ExtensionRuntime>>,
    install_dir: PathBuf,
    temp_dir: PathBuf,
    permits: Arc<Semaphore>,
}

impl InstallerService {
    pub fn new(
        source: Arc<dyn RepositorySource>,
        jobs: Arc<dyn JobStore>,
        registry: Arc<dyn ExtensionRegistry>,
        loader: Arc<dyn ExtensionLoader>,
        options: InstallerOptions,
    ) -> Self {
        Self {
            source,
            jobs,
            registry,
            loader,
            runtime: None,
            install_dir: options.install_dir,
            temp_dir: options.temp_dir,
            permits: Arc::new(Semaphore::new(options.concurrency.max(1))),
        }
    }

    /// Dispose live workers of updated extensions.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn ExtensionRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Standard wiring against a host: HTTP source, SQLite job store on
    /// `pool` (migrated here) and the host's registry, loader and runtime.
    pub async fn from_host(host: &ExtensionHost, config: &JamraConfig, pool: SqlitePool) -> Result<Self> {
        crate::run_migrations(&pool).await?;
        let source = RepositoryFetcher::new(&config.installer)?;
        Ok(Self::new(
            Arc::new(source),
            Arc::new(SqliteJobStore::with_pool(pool)),
            Arc::clone(host.registry()),
            Arc::clone(host.loader()),
            InstallerOptions::from_config(config),
        )
        .with_runtime(Arc::clone(host.runtime())))
    }

    /// Create one job per requested extension and start them in the
    /// background. Returns the job ids in request order.
    pub async fn queue_install(&self, request: InstallRequest) -> Result<Vec<String>> {
        let repository_url = request.repository_url.trim().to_string();
        if repository_url.is_empty() {
            return Err(Error::validation("repositoryUrl is required"));
        }
        let branch = request
            .branch
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
            .to_string();
        source::index_url(&repository_url, &branch)?;

        let mut targets: Vec<Option<String>> = Vec::new();
        for id in request.extension_ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !targets.iter().any(|t| t.as_deref() == Some(id.as_str())) {
                targets.push(Some(id));
            }
        }
        if targets.is_empty() {
            targets.push(None);
        }

        let mut job_ids = Vec::with_capacity(targets.len());
        for extension_id in targets {
            let job = InstallJob::new(&repository_url, &branch, extension_id);
            self.jobs.insert(&job).await?;
            info!(
                job_id = %job.id,
                repo_url = %job.repo_url,
                branch = %job.branch,
                extension_id = ?job.extension_id,
                "install queued"
            );
            job_ids.push(job.id.clone());

            let this = self.clone();
            tokio::spawn(async move { this.run_job(job).await });
        }
        Ok(job_ids)
    }

    /// `None` when no job has this id.
    pub async fn install_status(&self, job_id: &str) -> Result<Option<InstallJob>> {
        self.jobs.get(job_id).await
    }

    /// Poll until the job is terminal. `None` when no job has this id.
    pub async fn wait_for(&self, job_id: &str, poll: Duration) -> Result<Option<InstallJob>> {
        loop {
            match self.jobs.get(job_id).await? {
                Some(job) if job.status.is_terminal() => return Ok(Some(job)),
                Some(_) => tokio::time::sleep(poll).await,
                None => return Ok(None),
            }
        }
    }

    /// Fetch and validate an index without installing anything.
    pub async fn repository_index(&self, repository_url: &str, branch: Option<&str>) -> Result<RepositoryIndex> {
        self.source
            .fetch_index(repository_url, branch.unwrap_or(DEFAULT_BRANCH))
            .await
    }

    async fn run_job(&self, mut job: InstallJob) {
        let outcome = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(_permit) => {
                let this = self.clone();
                let mut attempt = job.clone();
                let task = tokio::spawn(async move {
                    let result = this.install(&mut attempt).await;
                    (attempt, result)
                });
                match task.await {
                    Ok((progressed, result)) => {
                        job = progressed;
                        result
                    },
                    Err(e) => {
                        // Pick up the last stage the task persisted.
                        if let Ok(Some(stored)) = self.jobs.get(&job.id).await {
                            job = stored;
                        }
                        Err(Error::domain(format!("install task aborted: {e}")))
                    },
                }
            },
            Err(e) => Err(Error::domain(format!("installer is shutting down: {e}"))),
        };

        let finished = match outcome {
            Ok(()) => job.complete(),
            Err(e) => {
                warn!(job_id = %job.id, stage = %job.stage, error = %e, "extension install failed");
                job.fail(e.to_string())
            },
        };
        if let Err(e) = finished {
            warn!(job_id = %job.id, error = %e, "install job already finished");
            return;
        }
        self.persist_final(&job).await;
    }

    async fn persist_final(&self, job: &InstallJob) {
        for attempt in 1..=FINAL_WRITE_ATTEMPTS {
            match self.jobs.update(job).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "failed to persist install job");
                    if attempt < FINAL_WRITE_ATTEMPTS {
                        tokio::time::sleep(FINAL_WRITE_BACKOFF * attempt).await;
                    }
                },
            }
        }
    }

    async fn enter(&self, job: &mut InstallJob, stage: InstallStage) -> Result<()> {
        job.advance(stage)?;
        self.jobs.update(job).await?;
        debug!(job_id = %job.id, %stage, "install stage");
        Ok(())
    }

    async fn install(&self, job: &mut InstallJob) -> Result<()> {
        self.enter(job, InstallStage::FetchingIndex).await?;
        let index = self.source.fetch_index(&job.repo_url, &job.branch).await?;

        self.enter(job, InstallStage::Validating).await?;
        let entry = select_entry(&index, job.extension_id.as_deref())?.clone();
        check_extension_id(&entry.id)?;
        job.extension_id = Some(entry.id.clone());

        self.enter(job, InstallStage::FetchingPackage).await?;
        let bytes = self.source.download_package(&entry).await?;
        let checksum = sha256_hex(&bytes);

        self.enter(job, InstallStage::Unpacking).await?;
        let temp_dir = self.temp_dir.clone();
        let staging_entry = entry.clone();
        let (staged, manifest) = tokio::task::spawn_blocking(move || {
            let mut staged = package::unpack(&bytes, &temp_dir, &staging_entry.entrypoint)?;
            staged.ensure_manifest(&staging_entry)?;
            staged.ensure_package_json(&staging_entry)?;
            let manifest = validate_package(&staged, &staging_entry.id)?;
            Ok::<_, Error>((staged, manifest))
        })
        .await??;
        debug!(job_id = %job.id, files = staged.files.len(), "package unpacked");

        self.enter(job, InstallStage::Compiling).await?;
        // Uncached so a live build of the same id cannot stand in for it.
        let staging_record = ExtensionRecord::new(manifest.clone(), staged.path().to_path_buf());
        self.loader.compile(&staging_record).await?;

        self.enter(job, InstallStage::Registering).await?;
        let install_path = self.install_dir.join(&manifest.id);
        let dest = install_path.clone();
        tokio::task::spawn_blocking(move || staged.persist(&dest)).await??;

        let mut record = ExtensionRecord::new(manifest, install_path)
            .with_repo_source(job.repo_url.clone())
            .with_checksum(checksum);
        if let Some(existing) = self.registry.find_by_id(&record.id).await? {
            record.enabled = existing.enabled;
            record.installed_at_ms = existing.installed_at_ms;
        }
        self.registry.upsert(&record).await?;

        self.loader.unload(&record).await;
        if let Err(e) = self.loader.load_source(&record).await {
            warn!(extension_id = %record.id, error = %e, "failed to precompile installed extension");
        }
        if let Some(runtime) = &self.runtime
            && let Err(e) = runtime.dispose(&record).await
        {
            warn!(extension_id = %record.id, error = %e, "failed to dispose previous extension context");
        }

        info!(
            job_id = %job.id,
            extension_id = %record.id,
            version = %record.version,
            checksum = record.checksum.as_deref().unwrap_or_default(),
            "extension installed"
        );
        Ok(())
    }
}

fn select_entry<'a>(index: &'a RepositoryIndex, requested: Option<&str>) -> Result<&'a IndexEntry> {
    match requested {
        Some(id) => index.find(id).ok_or_else(|| {
            Error::validation(format!(
                "Extension {id} not found in repository index. Available: {}",
                index.ids().join(", ")
            ))
        }),
        None => match index.extensions.as_slice() {
            [only] => Ok(only),
            _ => Err(Error::validation(format!(
                "Repository lists multiple extensions; choose one of: {}",
                index.ids().join(", ")
            ))),
        },
    }
}
