//! ktm CLI
//!
//! Opens, lists and closes SSH tunnels to the API servers of many
//! Kubernetes clusters and keeps kubeconfig pointed at one of them.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ktm::commands;
use ktm_core::config::{self, ConfigFile, ConfigOverrides, LoggingConfig};
use ktm_orchestrator::kubectx::Kubectl;
use ktm_orchestrator::ManagerState;

#[derive(Parser)]
#[command(name = "ktm")]
#[command(author, version, about = "Multi-cluster Kubernetes tunnel manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = config::ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print machine-readable JSON where supported
    #[arg(long, global = true)]
    json: bool,

    /// First local port handed out to tunnels
    #[arg(long, global = true, env = config::ENV_PORT_RANGE_START)]
    port_range_start: Option<u16>,

    /// Number of local ports available to tunnels
    #[arg(long, global = true, env = config::ENV_PORT_RANGE_SIZE)]
    port_range_size: Option<u16>,

    /// Also write logs to this file
    #[arg(long, global = true, env = config::ENV_LOG_FILE)]
    log_file: Option<PathBuf>,

    /// Directory holding tunnel state
    #[arg(long, global = true, env = config::ENV_STATE_DIR)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show live tunnels and the current context
    Status {
        /// Fail unless the current context has a live tunnel
        #[arg(long)]
        require_active: bool,
    },

    /// List live tunnels
    #[command(alias = "ls")]
    ListTunnels,

    /// Close the tunnels for the given contexts
    Kill {
        /// Context name(s), e.g. acme-k3s-prod
        #[arg(required = true)]
        contexts: Vec<String>,
    },

    /// Close every tunnel
    KillAll,

    /// Connect several clusters and switch to the first that connects
    ConnectBatch {
        /// Cluster ids (group:host) or context names, in order
        #[arg(required = true)]
        clusters: Vec<String>,
        /// Leave the current kubeconfig context unchanged
        #[arg(long)]
        no_activate: bool,
    },

    /// Connect one cluster and switch to it
    Connect {
        /// Cluster id (group:host) or context name
        cluster: String,
        /// Continue without asking when its network requirement is unmet
        #[arg(short, long)]
        yes: bool,
        /// Leave the current kubeconfig context unchanged
        #[arg(long)]
        no_activate: bool,
    },

    /// List configured clusters
    Clusters,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file and state directory paths
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(config::expand_home)
        .unwrap_or_else(config::default_config_path);

    let mut file_config = ConfigFile::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config {:?}", config_path))?;
    file_config.apply(&ConfigOverrides {
        port_range_start: cli.port_range_start,
        port_range_size: cli.port_range_size,
        log_file: cli.log_file.clone(),
        state_dir: cli.state_dir.clone(),
    });

    init_logging(cli.quiet, cli.verbose, &file_config.logging)?;

    let command = cli.command.unwrap_or(Commands::Status {
        require_active: false,
    });

    // Config commands must work even when the configuration does not validate
    let state = || ManagerState::from_config(&file_config);
    let kube = Kubectl::default();

    match command {
        Commands::Status { require_active } => {
            commands::status_command(&state()?, &kube, cli.json, require_active).await
        }
        Commands::ListTunnels => commands::list_tunnels_command(&state()?, cli.json).await,
        Commands::Kill { contexts } => commands::kill_command(&state()?, &contexts).await,
        Commands::KillAll => commands::kill_all_command(&state()?).await,
        Commands::ConnectBatch {
            clusters,
            no_activate,
        } => {
            let state = state()?;
            let cancel = cancel_on_interrupt();
            commands::connect_batch_command(
                &file_config,
                &state,
                &kube,
                &clusters,
                no_activate,
                cli.json,
                &cancel,
            )
            .await
        }
        Commands::Connect {
            cluster,
            yes,
            no_activate,
        } => {
            commands::connect_command(&file_config, &state()?, &kube, &cluster, yes, no_activate)
                .await
        }
        Commands::Clusters => commands::clusters_command(&file_config, &state()?, cli.json).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config_path, &file_config),
            ConfigAction::Path => commands::config_path(&config_path, &file_config),
            ConfigAction::Init { force } => commands::config_init(&config_path, force),
        },
    }
}

/// Set up the tracing subscriber
///
/// `-q`/`-v` pick the level, falling back to `logging.level`; `RUST_LOG`
/// overrides both. Logs go to stderr and, when configured, to a file.
fn init_logging(quiet: bool, verbose: u8, logging: &LoggingConfig) -> Result<()> {
    let log_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => logging.level.as_str(),
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    let file_layer = match &logging.file {
        Some(path) => {
            let path = config::expand_home(path);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory: {:?}", dir))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(())
}

/// Cancel the returned token on Ctrl+C or SIGTERM
///
/// A batch in progress finishes the cluster it is on and stops; tunnels
/// already open stay open.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::debug!("Could not install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::warn!("Interrupted, stopping after the current cluster");
            }
            _ = terminate => {
                tracing::warn!("Terminated, stopping after the current cluster");
            }
        }

        cancel_clone.cancel();
    });

    cancel
}
