use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use project_sync::db::StateDatabase;
use project_sync::models::{Notice, NoticeLevel};
use project_sync::services::{CondaCli, GitCli, HttpProjectService, LocalFiles, VersionControl};
use project_sync::{Collaborators, ProjectSession, Settings};

#[derive(Parser)]
#[command(name = "psync")]
#[command(about = "Keep projects and their package environments in sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a project folder and synchronize its environment
    Open {
        /// Project folder, relative to the current directory
        path: String,
    },
    /// Create a project from the template, then open it
    New {
        /// Folder in which the project is generated
        cwd: String,
        /// Template parameter, repeatable
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Clone a git repository and open it as a project
    Import {
        /// Folder receiving the clone
        cwd: String,
        url: String,
    },
    /// Close the active project
    Close,
    /// Delete the active project folder and its environment
    Delete,
    /// Show the active project
    Status,
    /// Synchronize the active project's environment again
    Sync,
    /// Follow git HEAD and package changes of the active project
    Watch {
        /// Polling period in seconds
        #[arg(short, long, default_value = "5")]
        interval: u64,
    },
}

/// Initialize tracing with output to stderr so stdout only carries results
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "project_sync=info".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

fn print_notice(notice: &Notice) {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Error => "error",
    };
    eprintln!("[{}] {}", tag, notice.message);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let settings = Settings::load();

    let db = match &settings.state_path {
        Some(path) => StateDatabase::open(path.clone())?,
        None => StateDatabase::open_default()?,
    };
    db.migrate()?;

    let root = std::env::current_dir()?;
    let git = Arc::new(GitCli::new(&root));
    let services = Collaborators {
        projects: Arc::new(HttpProjectService::new(
            settings.server_url.clone(),
            settings.api_token.clone(),
        )),
        state: Arc::new(db),
        files: Arc::new(LocalFiles::new(&root)),
        environments: Some(Arc::new(CondaCli::new())),
        vcs: Some(git.clone()),
    };

    let session = ProjectSession::start(settings, services);
    let _notices = session.notices().connect(print_notice);
    session.restored().await;

    match cli.command {
        Commands::Open { path } => {
            let project = session.open_project(&path).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Commands::New { cwd, params } => {
            let params: serde_json::Map<String, serde_json::Value> = params
                .into_iter()
                .map(|(key, value)| (key, serde_json::Value::String(value)))
                .collect();
            let params = serde_json::Value::Object(params);
            let project = session.new_project(&cwd, &params).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Commands::Import { cwd, url } => {
            let project = session.import_project(&cwd, &url).await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Commands::Close => {
            session.close_project().await?;
        }
        Commands::Delete => {
            let project = session.delete_project().await?;
            println!("Deleted {}", project.path);
        }
        Commands::Status => match session.status().current() {
            Some(status) => {
                println!("{}", status.title);
                if let Some(environment) = session
                    .manager()
                    .project()
                    .and_then(|project| project.environment)
                {
                    println!("Environment: {}", environment);
                }
            }
            None => println!("No active project"),
        },
        Commands::Sync => {
            let project = session.sync_active().await?;
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
        Commands::Watch { interval } => {
            let Some(project) = session.manager().project() else {
                anyhow::bail!("No active project");
            };
            git.track(&project.path);
            let period = Duration::from_secs(interval.max(1));
            let poller = git.clone().spawn_head_poller(period);

            tracing::info!("Watching project '{}'", project.path);
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // The environment may have been changed from outside.
                        if let (Some(listeners), Some(active)) =
                            (session.listeners(), session.manager().project())
                        {
                            if active.environment.is_some() {
                                listeners.request_spec_update(active);
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            poller.abort();
        }
    }

    session.settle().await;
    Ok(())
}
