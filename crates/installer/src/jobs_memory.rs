use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{
    Result,
    jobs::{InstallJob, JobStore, already_terminal, job_not_found},
};

/// Jobs held for the life of the process.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, InstallJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &InstallJob) -> Result<()> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<InstallJob>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, job: &InstallJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs.get_mut(&job.id).ok_or_else(|| job_not_found(&job.id))?;
        if stored.status.is_terminal() {
            return Err(already_terminal(&stored.id, stored.status));
        }
        *stored = job.clone();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, crate::jobs::JobStatus};

    #[tokio::test]
    async fn terminal_jobs_reject_updates() {
        let store = InMemoryJobStore::new();
        let mut job = InstallJob::new("github.com/acme/pack", "main", None);
        store.insert(&job).await.unwrap();

        job.complete().unwrap();
        store.update(&job).await.unwrap();

        let mut rewritten = job.clone();
        rewritten.status = JobStatus::Failed;
        assert!(store.update(&rewritten).await.unwrap_err().is_validation());
        assert_eq!(
            store.get(&job.id).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
        assert!(store.get("nope").await.unwrap().is_none());
    }
}
