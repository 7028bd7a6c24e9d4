//! Fetch → raw store → parse → link → resolve performers → price tracking.
pub mod ingest;
pub mod linking;
pub mod performers;
pub mod prices;

pub use ingest::{backfill_performers, crawl_batch, process_raw_batch, BatchReport};
pub use linking::{cleanup_invalid_products, link_source, LinkOutcome, LinkTarget};
pub use performers::{reconcile_spaced_performers, resolve_performers, PerformerResolver};
pub use prices::{predict_sales, record_price_observation, PriceObservation, SaleTransition};
