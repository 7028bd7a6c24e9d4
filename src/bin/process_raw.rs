use anyhow::Result;
use asp_catalog::catalog::DryRunCatalog;
use asp_catalog::cli::{announce, bootstrap, connect, BatchArgs};
use asp_catalog::parsers::ParserRegistry;
use asp_catalog::pipeline::process_raw_batch;
use asp_catalog::raw_store::RawContentStore;
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "process_raw", about = "Parse unprocessed raw content and link it into the catalog")]
struct Cli {
    /// ASP name as configured in the sources file
    #[arg(long)]
    source: String,
    #[command(flatten)]
    batch: BatchArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("process_raw")?;
    announce("process_raw", &cli.batch);
    let sources = config.load_sources()?;
    let registry = ParserRegistry::from_sources(&sources);
    let store = RawContentStore::new(&config.storage);
    let db = connect(&config).await?;

    let report = if cli.batch.dry_run {
        let dry = DryRunCatalog::new(&db);
        let report = process_raw_batch(&dry, &store, &registry, &sources, &cli.source, cli.batch.limit).await?;
        info!(intended_writes = dry.intended_writes(), "dry run finished");
        report
    } else {
        process_raw_batch(&db, &store, &registry, &sources, &cli.source, cli.batch.limit).await?
    };
    report.log("process_raw");
    Ok(())
}
