use anyhow::Result;
use asp_catalog::catalog::DryRunCatalog;
use asp_catalog::cli::{announce, bootstrap, connect, BatchArgs};
use asp_catalog::pipeline::backfill_performers;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "backfill_performers", about = "Resolve performers for products that have none")]
struct Cli {
    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("backfill_performers")?;
    announce("backfill_performers", &cli.batch);
    let db = connect(&config).await?;

    let report = if cli.batch.dry_run {
        let dry = DryRunCatalog::new(&db);
        let report = backfill_performers(&dry, cli.batch.limit).await?;
        info!(intended_writes = dry.intended_writes(), "dry run finished");
        report
    } else {
        backfill_performers(&db, cli.batch.limit).await?
    };
    report.log("backfill_performers");
    Ok(())
}
