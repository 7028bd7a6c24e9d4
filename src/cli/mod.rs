//! Shared plumbing for the batch binaries in `src/bin`.
use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::config::PipelineConfig;
use crate::database_ops::Db;
use crate::util::env::{db_url, init_env, preflight_check};

/// Flags every batch stage accepts.
#[derive(Debug, Clone, Args)]
pub struct BatchArgs {
    /// Maximum number of work items to process in this run
    #[arg(long, default_value_t = 100)]
    pub limit: i64,
    /// Report intended changes without writing anything
    #[arg(long)]
    pub dry_run: bool,
}

const LOGGED_ENV: &[&str] = &[
    "DATABASE_URL",
    "DB_URL",
    "DB_HOST",
    "RAW_STORAGE_ENABLED",
    "RAW_STORAGE_URL",
    "SOURCES_CONFIG",
    "REQUEST_DELAY_MS",
    "FETCH_MAX_RETRIES",
    "AUTO_MIGRATE",
    "LOG_COMPACT",
];

/// Loads `.env`, installs tracing and reads the pipeline configuration.
pub fn bootstrap(stage: &str) -> Result<PipelineConfig> {
    init_env();
    crate::tracing::init_tracing("info,sqlx=warn")?;
    preflight_check(stage, &[], LOGGED_ENV)?;
    Ok(PipelineConfig::from_env())
}

/// Database connection for a batch stage; failure here is the one fatal case.
pub async fn connect(config: &PipelineConfig) -> Result<Db> {
    let url = db_url().context("no database configured (DATABASE_URL | DB_URL | DB_*)")?;
    Db::connect(&url, config.db_max_connections).await
}

pub fn announce(stage: &str, args: &BatchArgs) {
    if args.dry_run {
        info!(stage, limit = args.limit, "dry run: no changes will be written");
    } else {
        info!(stage, limit = args.limit, "starting");
    }
}
