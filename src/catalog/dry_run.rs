//! `--dry-run` support: reads go to the wrapped store, writes are logged as
//! intended changes and answered with placeholder (negative) ids.
use std::sync::atomic::{AtomicI64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::*;

pub struct DryRunCatalog<'a, S: ?Sized> {
    inner: &'a S,
    next_placeholder: AtomicI64,
    intended_writes: AtomicI64,
}

impl<'a, S: ?Sized> DryRunCatalog<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self {
            inner,
            next_placeholder: AtomicI64::new(0),
            intended_writes: AtomicI64::new(0),
        }
    }

    /// Number of writes that would have been issued.
    pub fn intended_writes(&self) -> i64 {
        self.intended_writes.load(Ordering::Relaxed)
    }

    fn placeholder(&self) -> i64 {
        self.intended_writes.fetch_add(1, Ordering::Relaxed);
        self.next_placeholder.fetch_sub(1, Ordering::Relaxed) - 1
    }

    fn note(&self) {
        self.intended_writes.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl<S: RawContentRepo + ?Sized> RawContentRepo for DryRunCatalog<'_, S> {
    async fn find_raw_by_hash(&self, source: &str, content_hash: &str) -> Result<Option<RawContentRecord>> {
        self.inner.find_raw_by_hash(source, content_hash).await
    }

    async fn insert_raw(&self, row: &NewRawContent) -> Result<Option<i64>> {
        info!(target: "dry_run", source = %row.source, source_product_id = %row.source_product_id,
            content_hash = %row.content_hash, stored = row.storage_ref.is_some(), "would insert raw content");
        Ok(Some(self.placeholder()))
    }

    async fn unprocessed_raw(&self, source: &str, limit: i64) -> Result<Vec<RawContentRecord>> {
        self.inner.unprocessed_raw(source, limit).await
    }

    async fn mark_raw_processed(&self, id: i64, _at: DateTime<Utc>) -> Result<bool> {
        info!(target: "dry_run", raw_id = id, "would mark raw content processed");
        self.note();
        Ok(true)
    }
}

#[async_trait]
impl<S: ProductRepo + ?Sized> ProductRepo for DryRunCatalog<'_, S> {
    async fn find_product_source(&self, asp_name: &str, original_product_id: &str) -> Result<Option<ProductSource>> {
        self.inner.find_product_source(asp_name, original_product_id).await
    }

    async fn update_product_source(&self, id: i64, update: &SourceUpdate) -> Result<()> {
        info!(target: "dry_run", product_source_id = id, price = ?update.price,
            affiliate_url = ?update.affiliate_url, "would update product source");
        self.note();
        Ok(())
    }

    async fn find_product_by_normalized_id(&self, normalized: &str) -> Result<Option<Product>> {
        self.inner.find_product_by_normalized_id(normalized).await
    }

    async fn replace_product_details(&self, product_id: i64, row: &NewProduct) -> Result<()> {
        info!(target: "dry_run", product_id, title = %row.title, "would replace placeholder product details");
        self.note();
        Ok(())
    }

    async fn insert_product(&self, row: &NewProduct) -> Result<i64> {
        info!(target: "dry_run", normalized_product_id = %row.normalized_product_id, title = %row.title,
            "would create product");
        Ok(self.placeholder())
    }

    async fn insert_product_source(&self, row: &NewProductSource) -> Result<i64> {
        info!(target: "dry_run", asp = %row.asp_name, original_id = %row.original_product_id,
            product_id = row.product_id, price = ?row.price, "would attach product source");
        Ok(self.placeholder())
    }

    async fn link_product_tag(&self, product_id: i64, tag: &str) -> Result<bool> {
        info!(target: "dry_run", product_id, tag, "would link tag");
        self.note();
        Ok(false)
    }

    async fn list_products(&self, after_id: i64, limit: i64) -> Result<Vec<Product>> {
        self.inner.list_products(after_id, limit).await
    }

    async fn delete_product_cascade(&self, product_id: i64) -> Result<()> {
        info!(target: "dry_run", product_id, "would delete product and dependent rows");
        self.note();
        Ok(())
    }
}

#[async_trait]
impl<S: PerformerRepo + ?Sized> PerformerRepo for DryRunCatalog<'_, S> {
    async fn performer_match_names(&self, min_chars: usize) -> Result<Vec<PerformerName>> {
        self.inner.performer_match_names(min_chars).await
    }

    async fn find_performer_by_name(&self, name: &str) -> Result<Option<i64>> {
        self.inner.find_performer_by_name(name).await
    }

    async fn find_performer_by_alias(&self, alias: &str) -> Result<Option<i64>> {
        self.inner.find_performer_by_alias(alias).await
    }

    async fn insert_performer(&self, name: &str, _name_kana: Option<&str>) -> Result<i64> {
        info!(target: "dry_run", name, "would create performer");
        Ok(self.placeholder())
    }

    async fn add_performer_alias(&self, performer_id: i64, alias: &str) -> Result<bool> {
        info!(target: "dry_run", performer_id, alias, "would add performer alias");
        self.note();
        Ok(false)
    }

    async fn link_product_performer(&self, product_id: i64, performer_id: i64) -> Result<bool> {
        info!(target: "dry_run", product_id, performer_id, "would link performer");
        self.note();
        Ok(false)
    }

    async fn spaced_performers(&self, limit: i64) -> Result<Vec<Performer>> {
        self.inner.spaced_performers(limit).await
    }

    async fn rename_performer(&self, performer_id: i64, name: &str) -> Result<()> {
        info!(target: "dry_run", performer_id, name, "would rename performer");
        self.note();
        Ok(())
    }

    async fn merge_performer(&self, duplicate_id: i64, canonical_id: i64) -> Result<()> {
        info!(target: "dry_run", duplicate_id, canonical_id, "would merge performer");
        self.note();
        Ok(())
    }

    async fn products_without_performers(&self, limit: i64) -> Result<Vec<(i64, String)>> {
        self.inner.products_without_performers(limit).await
    }
}

#[async_trait]
impl<S: PriceRepo + ?Sized> PriceRepo for DryRunCatalog<'_, S> {
    async fn append_price_history(&self, row: &PriceHistoryRow) -> Result<()> {
        info!(target: "dry_run", product_source_id = row.product_source_id, price = row.price,
            sale_price = ?row.sale_price, "would append price history");
        self.note();
        Ok(())
    }

    async fn active_sale(&self, product_source_id: i64) -> Result<Option<ProductSale>> {
        self.inner.active_sale(product_source_id).await
    }

    async fn insert_sale(&self, row: &NewSale) -> Result<Option<i64>> {
        info!(target: "dry_run", product_source_id = row.product_source_id, sale_price = row.sale_price,
            discount_percent = row.discount_percent, "would start sale");
        Ok(Some(self.placeholder()))
    }

    async fn update_active_sale(&self, sale_id: i64, sale_price: i64, discount_percent: i32, _end_at: Option<DateTime<Utc>>) -> Result<()> {
        info!(target: "dry_run", sale_id, sale_price, discount_percent, "would update active sale");
        self.note();
        Ok(())
    }

    async fn deactivate_sale(&self, sale_id: i64, _at: DateTime<Utc>) -> Result<()> {
        info!(target: "dry_run", sale_id, "would end sale");
        self.note();
        Ok(())
    }

    async fn sales_due_to_expire(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ProductSale>> {
        let due = self.inner.sales_due_to_expire(now, limit).await?;
        let ids: Vec<i64> = due.iter().map(|s| s.id).collect();
        info!(target: "dry_run", %now, count = due.len(), ?ids, "sales past end_at");
        Ok(due)
    }

    async fn monthly_sale_counts(&self, product_source_id: Option<i64>) -> Result<Vec<MonthlySaleCounts>> {
        self.inner.monthly_sale_counts(product_source_id).await
    }

    async fn sale_summary(&self) -> Result<SaleSummary> {
        self.inner.sale_summary().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;

    #[tokio::test]
    async fn writes_are_not_forwarded() {
        let mem = MemoryCatalog::new();
        let dry = DryRunCatalog::new(&mem);
        let id = dry
            .insert_product(&NewProduct {
                normalized_product_id: "ABC-001".into(),
                title: "A long enough title".into(),
                description: None,
                release_date: None,
                default_thumbnail_url: None,
            })
            .await
            .unwrap();
        assert!(id < 0);
        assert!(dry.link_product_performer(id, 1).await.is_ok());
        assert_eq!(dry.intended_writes(), 2);
        assert!(mem.with(|s| s.products.is_empty() && s.product_performers.is_empty()));
    }
}
