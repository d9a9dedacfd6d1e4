//! Chadburn CLI entry point.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/etc/chadburn.conf";

#[derive(Parser)]
#[command(name = "chadburn", version)]
#[command(about = "A docker-aware cron-style job scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon
    Daemon {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Enable the Prometheus-compatible metrics endpoint
        #[arg(long)]
        metrics: bool,

        /// Metrics endpoint listen address
        #[arg(long = "listen-address", default_value = ":8080")]
        listen_address: String,

        /// Disable docker integration; only job-local entries will run
        #[arg(long = "disable-docker")]
        disable_docker: bool,
    },
    /// Validate the config file and report whether it loads
    Validate {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

/// Default level is INFO; `CHADBURN_LOG_LEVEL` overrides it and accepts any
/// tracing filter directive.
fn init_logging() {
    let filter = match std::env::var("CHADBURN_LOG_LEVEL") {
        Ok(level) => EnvFilter::try_new(&level).unwrap_or_else(|error| {
            eprintln!("warning: could not interpret {level:?} as a log level: {error}");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::new("info"),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Daemon {
            config,
            metrics,
            listen_address,
            disable_docker,
        } => {
            chadburn::daemon::run(chadburn::daemon::DaemonOptions {
                config_path: config,
                metrics,
                listen_address,
                disable_docker,
            })
            .await
        }
        Command::Validate { config } => chadburn::daemon::validate(&config),
    };

    if let Err(error) = result {
        tracing::error!(%error, "can't start the app");
        std::process::exit(1);
    }
}
