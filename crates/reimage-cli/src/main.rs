//! reimage — roll container cluster nodes onto the newest machine image.
//!
//! # Usage
//!
//! ```text
//! reimage --fleet demos/fleet.toml rpl --asgname web --clustername web --image 'base-*' --owner self
//! reimage --fleet demos/fleet.toml rmi --asgname web --image 'base-*' --owner self --gen 2 -r
//! reimage --fleet demos/fleet.toml rms --owner self --dry-run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use reimage_prune::ImagePruneRequest;
use reimage_rollout::ReplaceRequest;

mod commands;
mod config;

use commands::Format;
use config::ReimageConfig;

#[derive(Parser)]
#[command(
    name = "reimage",
    about = "Replace cluster nodes running an outdated machine image",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Simulated fleet description to run against
    #[arg(long, global = true)]
    fleet: Option<PathBuf>,
    /// Provider region, e.g. ap-northeast-1
    #[arg(long, global = true)]
    region: Option<String>,
    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace every outdated node of a cluster, keeping capacity
    #[command(visible_aliases = ["replace", "asg", "r"])]
    Rpl {
        /// Scaling group backing the cluster
        #[arg(long)]
        asgname: String,
        /// Container cluster name
        #[arg(long)]
        clustername: String,
        /// Image name filter; `*` is a wildcard
        #[arg(long)]
        image: String,
        /// Image owner account
        #[arg(long)]
        owner: String,
        /// Issue every mutating call as a validation-only request
        #[arg(short, long)]
        dry_run: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Deregister images older than the newest generations
    #[command(visible_aliases = ["delete", "d"])]
    Rmi {
        /// Scaling group whose current image is always kept
        #[arg(long)]
        asgname: String,
        #[arg(long)]
        image: String,
        #[arg(long)]
        owner: String,
        /// Generations to keep
        #[arg(long = "gen", default_value_t = 2)]
        generations: usize,
        /// Also delete the snapshots behind each deregistered image
        #[arg(short = 'r', long)]
        delete_snapshot: bool,
        #[arg(short, long)]
        dry_run: bool,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Delete snapshots that no image or volume references
    #[command(visible_aliases = ["delete-snap", "ds"])]
    Rms {
        #[arg(long)]
        owner: String,
        #[arg(short, long)]
        dry_run: bool,
        #[arg(short, long)]
        verbose: bool,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Self::Rpl { verbose, .. } | Self::Rmi { verbose, .. } | Self::Rms { verbose, .. } => *verbose,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let directive = if cli.command.verbose() { "reimage=debug" } else { "reimage=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ReimageConfig::load(cli.config.as_deref())?;
    let region = config.region(cli.region.as_deref())?;
    let profiles = config.profiles()?;
    let fleet = cli.fleet.or(config.fleet);
    let clients = commands::connect(fleet.as_deref(), &region)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    match cli.command {
        Commands::Rpl {
            asgname,
            clustername,
            image,
            owner,
            dry_run,
            ..
        } => {
            let req = ReplaceRequest {
                group: asgname,
                cluster: clustername,
                image_filter: image,
                owner,
            };
            commands::replace::replace(clients, profiles, shutdown_rx, req, dry_run, cli.format).await
        }
        Commands::Rmi {
            asgname,
            image,
            owner,
            generations,
            delete_snapshot,
            dry_run,
            ..
        } => {
            let req = ImagePruneRequest {
                group: asgname,
                owner,
                image_filter: image,
                generations,
                delete_snapshots: delete_snapshot,
            };
            commands::prune::images(clients, req, dry_run, cli.format).await
        }
        Commands::Rms { owner, dry_run, .. } => {
            commands::prune::snapshots(clients, &owner, dry_run, cli.format).await
        }
    }
}
