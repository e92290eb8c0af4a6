use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use logger::{LogFormat, init_tracing};
use tracing::info;

use vigil::config::Config;
use vigil::orchestrator::Orchestrator;
use vigil::pool::open_pool;

#[derive(Parser)]
#[command(name = "vigil-service")]
#[command(about = "Self-hosted uptime monitoring engine", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/vigil/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides the config
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Log output format: compact or json
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_ref()).context("failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    if cli.print_config {
        print!("{config}");
        return Ok(());
    }

    init_tracing(
        config.logging.level_filter(),
        cli.log_format.unwrap_or_else(|| config.logging.log_format()),
    );

    info!(path = %config.database.path.display(), pool_size = config.database.pool_size, "Opening database");
    let pool = open_pool(&config.database.path, config.database.pool_size).await?;

    Orchestrator::start(config, pool).await
}
