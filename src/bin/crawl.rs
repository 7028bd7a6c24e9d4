use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use asp_catalog::catalog::DryRunCatalog;
use asp_catalog::cli::{announce, bootstrap, connect, BatchArgs};
use asp_catalog::fetch::{build_client, RequestPacer};
use asp_catalog::pipeline::crawl_batch;
use asp_catalog::raw_store::RawContentStore;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "crawl", about = "Fetch detail pages for source ids into the raw content store")]
struct Cli {
    /// ASP name as configured in the sources file (e.g. MGS)
    #[arg(long)]
    source: String,
    /// File with one source-native product id per line (`#` starts a comment)
    #[arg(long)]
    ids_file: PathBuf,
    #[command(flatten)]
    batch: BatchArgs,
}

fn read_ids(path: &Path, limit: i64) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(raw
        .lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .take(limit.max(0) as usize)
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("crawl")?;
    announce("crawl", &cli.batch);
    let sources = config.load_sources()?;
    let ids = read_ids(&cli.ids_file, cli.batch.limit)?;
    let db = connect(&config).await?;
    let client = build_client(config.request_timeout, config.connect_timeout)?;
    let pacer = RequestPacer::new(config.request_delay);

    let report = if cli.batch.dry_run {
        // Object storage is left untouched as well.
        let dry = DryRunCatalog::new(&db);
        let store = RawContentStore::disabled();
        let report = crawl_batch(&client, &pacer, &store, &dry, &sources, &cli.source, &ids, &config.retry).await?;
        tracing::info!(intended_writes = dry.intended_writes(), "dry run finished");
        report
    } else {
        let store = RawContentStore::new(&config.storage);
        crawl_batch(&client, &pacer, &store, &db, &sources, &cli.source, &ids, &config.retry).await?
    };
    report.log("crawl");
    Ok(())
}
