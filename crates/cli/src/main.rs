mod extension_commands;
mod install_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    jamra_config::{Environment, JamraConfig},
    jamra_extensions::ExtensionHost,
    sqlx::SqlitePool,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "jamra", about = "JAMRA extension host", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/jamra/).
    #[arg(long, global = true, env = "JAMRA_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "JAMRA_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Installed extension management.
    Extensions {
        #[command(subcommand)]
        action: extension_commands::ExtensionAction,
    },
    /// List the extensions published by a repository.
    Repo {
        /// Repository URL on github.com, gitlab.com or bitbucket.org.
        url: String,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Install extensions from a repository and wait for the jobs to finish.
    Install {
        url: String,
        #[arg(long)]
        branch: Option<String>,
        /// Extension id to install. Repeatable.
        #[arg(long = "extension", value_name = "ID")]
        extensions: Vec<String>,
        /// Install every extension in the repository index.
        #[arg(long, conflicts_with = "extensions")]
        all: bool,
    },
    /// Show an install job.
    Status { job_id: String },
    /// Development mode: register local extensions and hot reload them.
    Dev,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Loaded configuration plus the host every command works against.
pub(crate) struct App {
    pub config: JamraConfig,
    pub pool: SqlitePool,
    pub host: Arc<ExtensionHost>,
}

impl App {
    async fn open(force_development: bool) -> anyhow::Result<Self> {
        let mut config = jamra_config::discover_and_load();
        if force_development {
            config.env = Environment::Development;
        }

        if config.database.url.is_none() {
            std::fs::create_dir_all(jamra_config::data_dir())?;
        }
        let pool = ExtensionHost::connect_pool(&config.database_url()).await?;
        let host = ExtensionHost::from_config(&config, pool.clone()).await?;
        Ok(Self {
            config,
            pool,
            host: Arc::new(host),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(ref dir) = cli.config_dir {
        jamra_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        jamra_config::set_data_dir(dir.clone());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "jamra starting");

    match cli.command {
        Commands::Extensions { action } => {
            let app = App::open(false).await?;
            extension_commands::handle_extensions(&app, action).await
        },
        Commands::Repo { url, branch } => {
            let app = App::open(false).await?;
            install_commands::list_repository(&app, &url, branch.as_deref()).await
        },
        Commands::Install {
            url,
            branch,
            extensions,
            all,
        } => {
            let app = App::open(false).await?;
            install_commands::install(&app, url, branch, extensions, all).await
        },
        Commands::Status { job_id } => {
            let app = App::open(false).await?;
            install_commands::status(&app, &job_id).await
        },
        Commands::Dev => {
            let app = App::open(true).await?;
            extension_commands::run_dev(&app).await
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn install_accepts_repeated_extensions() {
        let cli = Cli::try_parse_from([
            "jamra",
            "install",
            "github.com/acme/pack",
            "--extension",
            "alpha",
            "--extension",
            "beta",
            "--branch",
            "dev",
        ])
        .unwrap();
        match cli.command {
            Commands::Install {
                url,
                branch,
                extensions,
                all,
            } => {
                assert_eq!(url, "github.com/acme/pack");
                assert_eq!(branch.as_deref(), Some("dev"));
                assert_eq!(extensions, vec!["alpha", "beta"]);
                assert!(!all);
            },
            _ => panic!("expected install"),
        }

        assert!(
            Cli::try_parse_from(["jamra", "install", "u", "--all", "--extension", "a"]).is_err()
        );
    }
}
