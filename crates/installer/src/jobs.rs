//! Install job model and the store trait.

use std::fmt;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step a job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStage {
    Queued,
    FetchingIndex,
    Validating,
    FetchingPackage,
    Unpacking,
    Compiling,
    Registering,
    Completed,
    Failed,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::FetchingIndex => "fetching-index",
            Self::Validating => "validating",
            Self::FetchingPackage => "fetching-package",
            Self::Unpacking => "unpacking",
            Self::Compiling => "compiling",
            Self::Registering => "registering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallJob {
    pub id: String,
    pub extension_id: Option<String>,
    pub status: JobStatus,
    pub stage: InstallStage,
    pub repo_url: String,
    pub branch: String,
    pub requested_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub error: Option<String>,
}

impl InstallJob {
    #[must_use]
    pub fn new(repo_url: impl Into<String>, branch: impl Into<String>, extension_id: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            extension_id,
            status: JobStatus::Pending,
            stage: InstallStage::Queued,
            repo_url: repo_url.into(),
            branch: branch.into(),
            requested_at_ms: jamra_common::now_ms(),
            completed_at_ms: None,
            error: None,
        }
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(already_terminal(&self.id, self.status));
        }
        Ok(())
    }

    /// Move to a later non-terminal stage.
    pub fn advance(&mut self, stage: InstallStage) -> Result<()> {
        self.ensure_pending()?;
        if matches!(stage, InstallStage::Completed | InstallStage::Failed) || stage <= self.stage {
            return Err(Error::validation(format!(
                "install job {} cannot move from {} to {stage}",
                self.id, self.stage
            )));
        }
        self.stage = stage;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.ensure_pending()?;
        self.status = JobStatus::Completed;
        self.stage = InstallStage::Completed;
        self.completed_at_ms = Some(jamra_common::now_ms());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.ensure_pending()?;
        self.status = JobStatus::Failed;
        self.stage = InstallStage::Failed;
        self.error = Some(error.into());
        self.completed_at_ms = Some(jamra_common::now_ms());
        Ok(())
    }
}

/// Persistence for install jobs, keyed by job id.
///
/// `update` refuses to overwrite a job whose stored status is already
/// terminal.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &InstallJob) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<InstallJob>>;
    async fn update(&self, job: &InstallJob) -> Result<()>;
}

pub(crate) fn already_terminal(id: &str, status: JobStatus) -> Error {
    Error::validation(format!("install job {id} is already {status}"))
}

pub(crate) fn job_not_found(id: &str) -> Error {
    Error::validation(format!("install job {id} not found"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn stages_only_move_forward() {
        let mut job = InstallJob::new("github.com/acme/pack", "main", None);
        assert_eq!(job.stage, InstallStage::Queued);
        job.advance(InstallStage::FetchingIndex).unwrap();
        job.advance(InstallStage::Unpacking).unwrap();
        assert!(job.advance(InstallStage::Validating).unwrap_err().is_validation());
        assert!(job.advance(InstallStage::Completed).is_err());
    }

    #[test]
    fn terminal_jobs_never_change() {
        let mut job = InstallJob::new("github.com/acme/pack", "main", Some("demo".into()));
        job.fail("boom").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.completed_at_ms.is_some());

        let before = job.clone();
        assert!(job.complete().unwrap_err().is_validation());
        assert!(job.advance(InstallStage::Registering).is_err());
        assert_eq!(job, before);
    }

    #[test]
    fn serializes_camel_case_with_kebab_stage() {
        let mut job = InstallJob::new("github.com/acme/pack", "main", None);
        job.advance(InstallStage::FetchingPackage).unwrap();
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["stage"], "fetching-package");
        assert_eq!(value["status"], "pending");
        assert!(value.get("repoUrl").is_some());
        assert_eq!(uuid::Uuid::parse_str(&job.id).unwrap().get_version_num(), 4);
    }
}
