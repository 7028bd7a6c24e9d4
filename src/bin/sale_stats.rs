use anyhow::Result;
use asp_catalog::catalog::PriceRepo;
use asp_catalog::cli::{bootstrap, connect};
use asp_catalog::pipeline::predict_sales;
use chrono::Utc;
use clap::Parser;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "sale_stats", about = "Print sale seasonality and active sale summary as JSON")]
struct Cli {
    /// Restrict the prediction to one product source
    #[arg(long)]
    source_id: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = bootstrap("sale_stats")?;
    let db = connect(&config).await?;
    let counts = db.monthly_sale_counts(cli.source_id).await?;
    let prediction = predict_sales(&counts, Utc::now());
    let summary = db.sale_summary().await?;
    let out = json!({
        "product_source_id": cli.source_id,
        "prediction": prediction,
        "active_sales": summary.active_sales,
        "average_active_discount": summary.average_discount,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
