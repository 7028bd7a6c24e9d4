use anyhow::Result;
use asp_catalog::catalog::DryRunCatalog;
use asp_catalog::cli::{announce, bootstrap, connect, BatchArgs};
use asp_catalog::pipeline::reconcile_spaced_performers;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "normalize_performers", about = "Merge or rename performers stored with spaced names")]
struct Cli {
    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("normalize_performers")?;
    announce("normalize_performers", &cli.batch);
    let db = connect(&config).await?;

    let report = if cli.batch.dry_run {
        let dry = DryRunCatalog::new(&db);
        let report = reconcile_spaced_performers(&dry, cli.batch.limit).await?;
        info!(intended_writes = dry.intended_writes(), "dry run finished");
        report
    } else {
        reconcile_spaced_performers(&db, cli.batch.limit).await?
    };
    info!(examined = report.examined, renamed = report.renamed, merged = report.merged, "normalize_performers complete");
    Ok(())
}
