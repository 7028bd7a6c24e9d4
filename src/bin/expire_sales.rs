use anyhow::Result;
use asp_catalog::catalog::DryRunCatalog;
use asp_catalog::cli::{announce, bootstrap, connect, BatchArgs};
use asp_catalog::pipeline::prices::expire_sales;
use chrono::Utc;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "expire_sales", about = "Deactivate sales whose announced end has passed")]
struct Cli {
    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("expire_sales")?;
    announce("expire_sales", &cli.batch);
    let db = connect(&config).await?;
    let now = Utc::now();

    let expired = if cli.batch.dry_run {
        let dry = DryRunCatalog::new(&db);
        let expired = expire_sales(&dry, now, cli.batch.limit).await?;
        info!(intended_writes = dry.intended_writes(), "dry run finished");
        expired
    } else {
        expire_sales(&db, now, cli.batch.limit).await?
    };
    info!(expired, dry_run = cli.batch.dry_run, "expire_sales complete");
    Ok(())
}
