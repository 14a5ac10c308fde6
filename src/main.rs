//! disposable-server - Run throwaway redis-server instances from the command line
//!
//! ## Commands
//!
//! - `run`: launch an instance (optionally with one replica) and keep it up until Ctrl-C
//! - `status`: print the `INFO` fields of a running server as JSON

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use disposable_server::core::{query_status, Instance, InstanceManager, SupervisorConfig};
use disposable_server::{APP_NAME, APP_VERSION};

/// Launch disposable redis-server instances.
#[derive(Parser, Debug)]
#[command(name = "disposable-server")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML file overriding the supervisor defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Server binary to launch (overrides config and DISPOSABLE_SERVER_BINARY)
    #[arg(long, global = true)]
    binary: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Launch an instance and keep it running until Ctrl-C
    Run {
        /// Listen on this port instead of a random one
        #[arg(long, short)]
        port: Option<u16>,

        /// Also start a replica of the instance
        #[arg(long)]
        replica: bool,

        /// How long the instance has to accept connections (ms)
        #[arg(long, default_value_t = 1000)]
        ready_timeout_ms: u64,
    },

    /// Print the status fields of a running server as JSON
    Status {
        /// Port of the server
        #[arg(long, short)]
        port: u16,

        /// Host of the server
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    info!("{} v{} starting...", APP_NAME, APP_VERSION);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            port,
            replica,
            ready_timeout_ms,
        } => run(config, port, replica, Duration::from_millis(ready_timeout_ms)).await,
        Commands::Status { port, host } => status(&config, &host, port),
    }
}

/// Initialize the logging system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("disposable_server=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<SupervisorConfig> {
    let config = match cli.config {
        Some(ref path) => SupervisorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SupervisorConfig::default(),
    };

    let config = config.with_env_overrides();
    Ok(match cli.binary {
        Some(ref binary) => config.with_binary_path(binary),
        None => config,
    })
}

async fn run(
    config: SupervisorConfig,
    port: Option<u16>,
    replica: bool,
    ready_timeout: Duration,
) -> Result<()> {
    let instances = tokio::task::spawn_blocking(move || -> Result<Vec<Instance>> {
        let manager = InstanceManager::new(config);

        let master = match port {
            Some(port) => manager.create_on_port(port),
            None => manager.create_on_random_port(),
        }
        .context("Failed to launch server")?;
        manager
            .wait_ready(&master, ready_timeout)
            .context("Server did not become ready")?;
        println!("master {}", master.address());

        let mut instances = vec![master];
        if replica {
            let replica = manager
                .attach_as_replica(&instances[0])
                .context("Failed to attach replica")?;
            println!("replica {}", replica.address());
            instances.push(replica);
        }
        Ok(instances)
    })
    .await
    .context("Launch task panicked")??;

    info!("Press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tokio::task::spawn_blocking(move || {
        // Replicas first, so they do not log a lost master
        for mut instance in instances.into_iter().rev() {
            if let Err(e) = instance.stop() {
                warn!("Failed to stop instance on port {}: {}", instance.port(), e);
            }
        }
    })
    .await
    .context("Shutdown task panicked")?;

    info!("{} shutting down", APP_NAME);
    Ok(())
}

fn status(config: &SupervisorConfig, host: &str, port: u16) -> Result<()> {
    let status = query_status(host, port, config.io_timeout())
        .with_context(|| format!("Failed to query {}:{}", host, port))?;

    let sorted: std::collections::BTreeMap<_, _> = status.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&sorted)?);
    Ok(())
}
