use anyhow::Result;
use asp_catalog::catalog::DryRunCatalog;
use asp_catalog::cli::{announce, bootstrap, connect, BatchArgs};
use asp_catalog::pipeline::cleanup_invalid_products;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cleanup_invalid_products", about = "Delete products created from placeholder scrapes")]
struct Cli {
    /// Products fetched per page while scanning
    #[arg(long, default_value_t = 500)]
    page_size: i64,
    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("cleanup_invalid_products")?;
    announce("cleanup_invalid_products", &cli.batch);
    let db = connect(&config).await?;
    let limit = cli.batch.limit.max(0) as usize;

    let report = if cli.batch.dry_run {
        let dry = DryRunCatalog::new(&db);
        cleanup_invalid_products(&dry, limit, cli.page_size).await?
    } else {
        cleanup_invalid_products(&db, limit, cli.page_size).await?
    };
    info!(scanned = report.scanned, deleted = report.deleted, dry_run = cli.batch.dry_run, "cleanup complete");
    Ok(())
}
