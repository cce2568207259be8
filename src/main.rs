use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use devcontainer_runner::config::load_config;
use devcontainer_runner::container::ContainerManager;
use devcontainer_runner::core::{Container, RegistryCredentials, RunContext, Settings};
use devcontainer_runner::docker::{DockerClient, ImageManager, NoCredentials, StaticCredentials};
use devcontainer_runner::monitoring::{init_tracing, TracingSink};
use devcontainer_runner::runner::{HostExecutor, Runner};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, env = "DEVCONTAINER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the devcontainer of a project and print the container as JSON
    Up {
        /// Project directory holding the devcontainer manifest
        project: PathBuf,
    },
    /// Stop one or more containers
    Stop {
        #[arg(required = true)]
        container_ids: Vec<String>,
    },
    /// Run a command inside a container
    Exec {
        container_id: String,
        /// Seconds before the command is abandoned with exit code 124
        #[arg(short, long)]
        timeout: Option<u64>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Copy a host file into a container directory
    Copy {
        container_id: String,
        file: PathBuf,
        dir: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    init_tracing(settings.log_level)?;

    let docker = Arc::new(DockerClient::from_settings(&settings.docker)?);
    if !docker.is_docker_available().await {
        bail!("Docker daemon is not reachable");
    }
    let credentials: Arc<dyn RegistryCredentials> = match &settings.registry {
        Some(registry) => Arc::new(StaticCredentials::from(registry)),
        None => Arc::new(NoCredentials),
    };
    let images = ImageManager::new(docker.clone(), credentials, Arc::new(TracingSink::new("docker")));
    let containers = ContainerManager::new(docker);
    let runner = Runner::new(images, containers, Arc::new(HostExecutor))
        .with_hook_timeout(settings.hooks.timeout());

    let ctx = RunContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Up { project } => {
            let config = load_config(&project)
                .await
                .with_context(|| format!("Failed to load devcontainer manifest from {}", project.display()))?;
            let container_id = runner.run(&ctx, &project, &config).await?;
            let project_id = project
                .canonicalize()
                .unwrap_or_else(|_| project.clone())
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("{}", serde_json::to_string(&Container::new(container_id, project_id))?);
        }
        Commands::Stop { container_ids } => {
            let failures = runner.stop_all(&ctx, &container_ids).await;
            if !failures.is_empty() {
                for (id, err) in &failures {
                    eprintln!("{id}: {err}");
                }
                bail!("{} of {} containers failed to stop", failures.len(), container_ids.len());
            }
            info!(count = container_ids.len(), "Containers stopped");
        }
        Commands::Exec {
            container_id,
            timeout,
            command,
        } => {
            let exec_ctx = match timeout {
                Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
                None => ctx.clone(),
            };
            let result = runner.containers().exec(&exec_ctx, &container_id, &command).await?;
            std::io::stdout().write_all(result.stdout.as_bytes())?;
            std::io::stderr().write_all(result.stderr.as_bytes())?;
            if !result.success() {
                std::process::exit(i32::try_from(result.exit_code).unwrap_or(1));
            }
        }
        Commands::Copy {
            container_id,
            file,
            dir,
        } => {
            runner
                .containers()
                .copy_file(&ctx, &container_id, &file, &dir)
                .await?;
        }
    }

    Ok(())
}
