//! jobhive admin CLI.
//!
//! Reads dashboards and manages failed or scheduled jobs on a Redis-backed
//! jobhive deployment.

mod cli;
mod cmd_admin;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jobhive::{ConfigLoader, JobStorage, RedisStore};

use crate::cli::{Cli, Commands};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = ConfigLoader::load_validated(cli.config.as_deref())
        .context("failed to load configuration")?;
    if matches!(cli.command, Commands::CheckConfig) {
        info!("Configuration is valid");
        return Ok(());
    }

    let store = RedisStore::connect(&config.storage.redis_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.storage.redis_url))?;
    let storage = JobStorage::new(Arc::new(store), config.storage.clone());

    cmd_admin::handle(cli.command, &storage, cli.format).await
}
