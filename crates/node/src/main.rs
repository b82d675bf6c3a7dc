//! quorumd: the quorumchain masternode daemon

use anyhow::Result;
use clap::{Parser, Subcommand};
use quorumd::{Node, NodeConfig, DEFAULT_CONFIG_FILE, DEFAULT_HOME_DIR, QUORUMD_HOME_ENV};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

/// quorumchain masternode daemon
#[derive(Parser)]
#[command(name = "quorumd")]
#[command(version)]
#[command(about = "quorumchain masternode daemon", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Directory for config and data
    #[arg(long, global = true, env = QUORUMD_HOME_ENV, default_value_os_t = default_home_dir())]
    home: PathBuf,

    /// The logging level (trace|debug|info|warn|error); RUST_LOG wins when set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// The logging format (json|plain)
    #[arg(long, global = true, default_value = "plain")]
    log_format: String,

    /// Disable colored logs
    #[arg(long, global = true, default_value = "false")]
    log_no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a single-node configuration with a fresh key
    Init {
        /// Worker slots per block
        #[arg(long, default_value = "1")]
        slots: u32,

        /// Serve Prometheus metrics on this address
        #[arg(long)]
        metrics_addr: Option<std::net::SocketAddr>,

        /// Overwrite existing configuration
        #[arg(long, default_value = "false")]
        overwrite: bool,
    },

    /// Run the node
    Start {
        /// Path to configuration file (overrides --home)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print version information
    Version {
        /// Output format (text|json)
        #[arg(long, default_value = "text")]
        output: String,
    },
}

/// Home directory when neither `--home` nor `QUORUMD_HOME` is given
fn default_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_HOME_DIR)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, &cli.log_format, cli.log_no_color);

    let result = match cli.command {
        Commands::Init {
            slots,
            metrics_addr,
            overwrite,
        } => cmd_init(&cli.home, slots, metrics_addr, overwrite),

        Commands::Start { config } => {
            let config_path = config.unwrap_or_else(|| cli.home.join(DEFAULT_CONFIG_FILE));
            cmd_start(&config_path).await
        }

        Commands::Version { output } => cmd_version(&output),
    };

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str, no_color: bool) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(!no_color);

    match log_format {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}

fn cmd_init(
    home: &Path,
    slots: u32,
    metrics_addr: Option<std::net::SocketAddr>,
    overwrite: bool,
) -> Result<()> {
    let config_path = home.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() && !overwrite {
        anyhow::bail!(
            "Configuration already exists at {}. Use --overwrite to replace.",
            config_path.display()
        );
    }

    let mut config = NodeConfig::single_node();
    config.consensus.slots_per_block = slots;
    config.metrics_addr = metrics_addr;
    config.home_dir = Some(home.to_path_buf());
    config.validate()?;
    config.save(&config_path)?;

    println!("Initialized node configuration");
    println!();
    println!("  Home:    {}", home.display());
    println!("  Node id: {}", config.node_id()?);
    println!("  Config:  {}", config_path.display());
    println!();
    println!("To start the node:");
    println!("  quorumd start --home {}", home.display());
    Ok(())
}

async fn cmd_start(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "Configuration file not found: {}\nRun 'quorumd init' first to create configuration.",
            config_path.display()
        );
    }
    info!(path = %config_path.display(), "Loading configuration");
    let config = NodeConfig::load(config_path)?;

    let node = Node::new(config)?;
    info!(node = %node.id(), "Node configured");
    node.run().await
}

#[derive(Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    rust_version: &'static str,
}

fn cmd_version(output: &str) -> Result<()> {
    let info = VersionInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        rust_version: env!("CARGO_PKG_RUST_VERSION"),
    };
    match output {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => {
            println!("{}: {}", info.name, info.version);
            println!("minimum rust version: {}", info.rust_version);
        }
    }
    Ok(())
}
