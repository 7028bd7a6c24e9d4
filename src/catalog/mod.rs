//! Canonical catalog rows and the repository seams the pipeline writes through.
//!
//! `Db` (Postgres) implements every trait here; `DryRunCatalog` wraps any
//! implementation and turns writes into logged intentions. All writes are
//! conflict-tolerant: a duplicate insert returns the existing row's id or
//! `false`, never an error.
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub mod dry_run;
#[cfg(test)]
pub(crate) mod memory;

pub use dry_run::DryRunCatalog;

#[derive(Debug, Clone, PartialEq)]
pub struct RawContentRecord {
    pub id: i64,
    pub source: String,
    pub source_product_id: String,
    pub content_hash: String,
    pub storage_ref: Option<String>,
    pub inline_content: Option<Vec<u8>>,
    pub fetched_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewRawContent {
    pub source: String,
    pub source_product_id: String,
    pub content_hash: String,
    pub storage_ref: Option<String>,
    pub inline_content: Option<Vec<u8>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub normalized_product_id: String,
    pub title: String,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub default_thumbnail_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub normalized_product_id: String,
    pub title: String,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub default_thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductSource {
    pub id: i64,
    pub asp_name: String,
    pub original_product_id: String,
    pub product_id: i64,
    /// Regular price in the currency's minor unit (yen have none).
    pub price: Option<i64>,
    pub currency: String,
    pub is_subscription: bool,
    pub affiliate_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewProductSource {
    pub asp_name: String,
    pub original_product_id: String,
    pub product_id: i64,
    pub price: Option<i64>,
    pub currency: String,
    pub is_subscription: bool,
    pub affiliate_url: Option<String>,
}

/// Fields of a listing that may change between crawls.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUpdate {
    pub price: Option<i64>,
    pub affiliate_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Performer {
    pub id: i64,
    pub name: String,
    pub name_kana: Option<String>,
}

/// A name (canonical or alias) that maps to a performer.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformerName {
    pub performer_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistoryRow {
    pub product_source_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub price: i64,
    pub sale_price: Option<i64>,
    pub discount_percent: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductSale {
    pub id: i64,
    pub product_source_id: i64,
    pub regular_price: i64,
    pub sale_price: i64,
    pub discount_percent: i32,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub product_source_id: i64,
    pub regular_price: i64,
    pub sale_price: i64,
    pub discount_percent: i32,
    pub start_at: DateTime<Utc>,
    pub end_at: Option<DateTime<Utc>>,
}

/// Per-calendar-month price observation counts (month is 1..=12).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonthlySaleCounts {
    pub month: u32,
    pub observations: i64,
    pub discounted: i64,
    pub discount_sum: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SaleSummary {
    pub active_sales: i64,
    pub average_discount: f64,
}

#[async_trait]
pub trait RawContentRepo: Send + Sync {
    async fn find_raw_by_hash(
        &self,
        source: &str,
        content_hash: &str,
    ) -> Result<Option<RawContentRecord>>;
    /// Insert unless (source, content_hash) already exists; `None` on conflict.
    async fn insert_raw(&self, row: &NewRawContent) -> Result<Option<i64>>;
    /// Oldest-first unprocessed records for a source.
    async fn unprocessed_raw(&self, source: &str, limit: i64) -> Result<Vec<RawContentRecord>>;
    /// Sets `processed_at` only if it is still unset.
    async fn mark_raw_processed(&self, id: i64, at: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
pub trait ProductRepo: Send + Sync {
    async fn find_product_source(
        &self,
        asp_name: &str,
        original_product_id: &str,
    ) -> Result<Option<ProductSource>>;
    async fn update_product_source(&self, id: i64, update: &SourceUpdate) -> Result<()>;
    async fn find_product_by_normalized_id(&self, normalized: &str) -> Result<Option<Product>>;
    /// Overwrite title and description; date and thumbnail only fill gaps.
    async fn replace_product_details(&self, product_id: i64, row: &NewProduct) -> Result<()>;
    /// Insert, or return the id of the product that already owns the normalized id.
    async fn insert_product(&self, row: &NewProduct) -> Result<i64>;
    /// Insert, or return the id of the existing (asp_name, original_product_id) row.
    async fn insert_product_source(&self, row: &NewProductSource) -> Result<i64>;
    /// Find-or-create the tag and link it; `true` when a new link row was written.
    async fn link_product_tag(&self, product_id: i64, tag: &str) -> Result<bool>;
    /// Products with id > `after_id`, ascending, at most `limit`.
    async fn list_products(&self, after_id: i64, limit: i64) -> Result<Vec<Product>>;
    /// Delete a product and every row that references it.
    async fn delete_product_cascade(&self, product_id: i64) -> Result<()>;
}

#[async_trait]
pub trait PerformerRepo: Send + Sync {
    /// All canonical names and aliases with at least `min_chars` characters.
    async fn performer_match_names(&self, min_chars: usize) -> Result<Vec<PerformerName>>;
    async fn find_performer_by_name(&self, name: &str) -> Result<Option<i64>>;
    async fn find_performer_by_alias(&self, alias: &str) -> Result<Option<i64>>;
    /// Insert, or return the id of the performer that already has this exact name.
    async fn insert_performer(&self, name: &str, name_kana: Option<&str>) -> Result<i64>;
    async fn add_performer_alias(&self, performer_id: i64, alias: &str) -> Result<bool>;
    /// `true` when a new link row was written.
    async fn link_product_performer(&self, product_id: i64, performer_id: i64) -> Result<bool>;
    /// Performers whose name contains whitespace and no Latin letters.
    async fn spaced_performers(&self, limit: i64) -> Result<Vec<Performer>>;
    async fn rename_performer(&self, performer_id: i64, name: &str) -> Result<()>;
    /// Move links and aliases from `duplicate_id` onto `canonical_id`, keep the
    /// duplicate's name as an alias, and delete the duplicate.
    async fn merge_performer(&self, duplicate_id: i64, canonical_id: i64) -> Result<()>;
    /// (product_id, title) for products that have no performer links yet.
    async fn products_without_performers(&self, limit: i64) -> Result<Vec<(i64, String)>>;
}

#[async_trait]
pub trait PriceRepo: Send + Sync {
    async fn append_price_history(&self, row: &PriceHistoryRow) -> Result<()>;
    async fn active_sale(&self, product_source_id: i64) -> Result<Option<ProductSale>>;
    /// Insert unless an active sale already exists; `None` on conflict.
    async fn insert_sale(&self, row: &NewSale) -> Result<Option<i64>>;
    async fn update_active_sale(
        &self,
        sale_id: i64,
        sale_price: i64,
        discount_percent: i32,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn deactivate_sale(&self, sale_id: i64, at: DateTime<Utc>) -> Result<()>;
    /// Active sales whose `end_at` is at or before `now`, oldest end first.
    async fn sales_due_to_expire(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ProductSale>>;
    async fn monthly_sale_counts(
        &self,
        product_source_id: Option<i64>,
    ) -> Result<Vec<MonthlySaleCounts>>;
    async fn sale_summary(&self) -> Result<SaleSummary>;
}

/// Everything the pipeline needs from the canonical store.
pub trait CatalogStore: RawContentRepo + ProductRepo + PerformerRepo + PriceRepo {}

impl<T> CatalogStore for T where T: RawContentRepo + ProductRepo + PerformerRepo + PriceRepo {}
