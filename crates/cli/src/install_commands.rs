use std::time::Duration;

use jamra_installer::{InstallRequest, InstallerService, JobStatus};

use crate::App;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

async fn installer(app: &App) -> anyhow::Result<InstallerService> {
    Ok(InstallerService::from_host(&app.host, &app.config, app.pool.clone()).await?)
}

pub async fn list_repository(app: &App, url: &str, branch: Option<&str>) -> anyhow::Result<()> {
    let index = installer(app).await?.repository_index(url, branch).await?;
    println!(
        "{} by {}: {}",
        index.repository.name, index.repository.author, index.repository.description
    );
    for entry in &index.extensions {
        println!(
            "  {:<24} {:<10} {:<10} {}: {}",
            entry.id,
            entry.version,
            format!("{:?}", entry.language).to_lowercase(),
            entry.name,
            entry.description
        );
    }
    Ok(())
}

pub async fn install(
    app: &App,
    url: String,
    branch: Option<String>,
    extension_ids: Vec<String>,
    all: bool,
) -> anyhow::Result<()> {
    let service = installer(app).await?;
    let extension_ids = if all {
        service
            .repository_index(&url, branch.as_deref())
            .await?
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect()
    } else {
        extension_ids
    };

    let job_ids = service
        .queue_install(InstallRequest {
            repository_url: url,
            branch,
            extension_ids,
        })
        .await?;

    let mut failed = 0;
    for job_id in &job_ids {
        let Some(job) = service.wait_for(job_id, POLL_INTERVAL).await? else {
            anyhow::bail!("install job {job_id} disappeared");
        };
        let target = job.extension_id.as_deref().unwrap_or("?");
        match job.status {
            JobStatus::Completed => println!("  {target:<24} installed  ({job_id})"),
            _ => {
                failed += 1;
                println!(
                    "  {target:<24} failed     ({job_id}): {}",
                    job.error.as_deref().unwrap_or("unknown error")
                );
            },
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} install(s) failed", job_ids.len());
    }
    Ok(())
}

pub async fn status(app: &App, job_id: &str) -> anyhow::Result<()> {
    match installer(app).await?.install_status(job_id).await? {
        Some(job) => {
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(())
        },
        None => anyhow::bail!("install job {job_id} not found"),
    }
}
