use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use asp_catalog::database_ops::db::run_migrations;
use asp_catalog::database_ops::Db;
use asp_catalog::util::env::{db_url, init_env, preflight_check};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "db_migrate", about = "Apply pending SQL migrations")]
struct Cli {
    #[arg(long, default_value = "./migrations")]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_env();
    asp_catalog::tracing::init_tracing("info,sqlx=warn")?;

    if !cli.dir.exists() {
        error!(dir = ?cli.dir, "migrations directory not found");
        bail!("migrations directory not found: {:?}", cli.dir);
    }
    preflight_check("db_migrate", &[], &["DATABASE_URL", "DB_URL", "DB_HOST"])?;
    let url = db_url().context("no database URL env vars set (DATABASE_URL | DB_URL | DB_*)")?;
    // One connection, no statement cache: safe behind PgBouncer.
    let db = Db::connect_no_migrate(&url, 1).await?;
    let applied = run_migrations(&db.pool, &cli.dir).await?;
    info!(applied, "migrations completed successfully");
    Ok(())
}
