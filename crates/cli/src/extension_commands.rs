use std::time::Duration;

use {anyhow::Context, clap::Subcommand, serde_json::Value};

use crate::App;

#[derive(Subcommand)]
pub enum ExtensionAction {
    /// List registered extensions.
    List,
    /// Show the stored record of an extension.
    Info { id: String },
    Enable { id: String },
    Disable { id: String },
    /// Unregister an extension.
    Remove {
        id: String,
        /// Also delete its install directory.
        #[arg(long)]
        purge: bool,
    },
    /// Call a lifecycle method and print the JSON result.
    Invoke {
        id: String,
        /// e.g. search, getMangaDetails, getChapters, getPages.
        method: String,
        /// JSON payload passed to the method.
        #[arg(long)]
        payload: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

pub async fn handle_extensions(app: &App, action: ExtensionAction) -> anyhow::Result<()> {
    let report = app.host.bootstrap().await?;
    if !report.compile_failed.is_empty() {
        eprintln!(
            "warning: failed to compile {}",
            report.compile_failed.join(", ")
        );
    }

    match action {
        ExtensionAction::List => {
            let mut records = app.host.registry().list().await?;
            if records.is_empty() {
                println!("No extensions installed.");
                return Ok(());
            }
            records.sort_by(|a, b| a.id.cmp(&b.id));
            for record in &records {
                println!(
                    "  {:<24} {:<10} {:<8} {}",
                    record.id,
                    record.version,
                    if record.enabled { "enabled" } else { "disabled" },
                    record.repo_source.as_deref().unwrap_or("-"),
                );
            }
        },
        ExtensionAction::Info { id } => {
            let record = app
                .host
                .registry()
                .find_by_id(&id)
                .await?
                .with_context(|| format!("extension {id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        },
        ExtensionAction::Enable { id } => {
            app.host.set_enabled(&id, true).await?;
            println!("Enabled {id}.");
        },
        ExtensionAction::Disable { id } => {
            app.host.set_enabled(&id, false).await?;
            println!("Disabled {id}.");
        },
        ExtensionAction::Remove { id, purge } => {
            if app.host.remove(&id, purge).await? {
                println!("Removed {id}.");
            } else {
                anyhow::bail!("extension {id} not found");
            }
        },
        ExtensionAction::Invoke {
            id,
            method,
            payload,
            timeout_ms,
        } => {
            let payload: Value = match payload {
                Some(raw) => serde_json::from_str(&raw).context("--payload must be valid JSON")?,
                None => Value::Null,
            };
            let result = app
                .host
                .invoke(&id, &method, payload, timeout_ms.map(Duration::from_millis))
                .await;
            if let Some(record) = app.host.registry().find_by_id(&id).await? {
                app.host.runtime().dispose(&record).await.ok();
            }
            println!("{}", serde_json::to_string_pretty(&result?)?);
        },
    }
    Ok(())
}

/// Register local extensions and hot reload them until Ctrl-C.
pub async fn run_dev(app: &App) -> anyhow::Result<()> {
    let report = app.host.bootstrap().await?;
    println!(
        "Registered {} local extension(s) from {}",
        report.registered.len(),
        app.host.install_dir().display()
    );
    let watcher = app
        .host
        .enable_dev_watcher()?
        .context("dev watcher requires development mode")?;

    println!("Watching for changes. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    drop(watcher);

    for record in app.host.registry().list().await? {
        app.host.runtime().dispose(&record).await.ok();
    }
    Ok(())
}
