//! Login relay - watches a record store for pending logins, verifies them
//! with their named provider, and writes back signed custom tokens.

mod app;

use std::path::PathBuf;

use clap::Parser;
use relay_config_and_utils::{init_logging, Config, Paths};

/// Login relay command-line interface.
#[derive(Parser)]
#[command(name = "login-relay")]
#[command(about = "Relay verifying pending login records into signed custom tokens")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Base directory for runtime files (config). Defaults to ~/.login-relay
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// JSON file of login records to write under the watch path at startup
    #[arg(long)]
    seed: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let config = Config::load(&paths)?;

    app::run_relay(config, cli.seed).await
}
