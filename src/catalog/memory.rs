//! In-memory catalog used by unit tests. Mirrors the unique constraints of the
//! Postgres schema so idempotence can be asserted without a database.
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};

use super::*;
use crate::normalization::performer_name::has_latin_letter;

#[derive(Default)]
pub(crate) struct MemoryState {
    next_id: i64,
    pub raw: Vec<RawContentRecord>,
    pub products: Vec<Product>,
    pub sources: Vec<ProductSource>,
    pub tags: HashMap<String, i64>,
    pub product_tags: BTreeSet<(i64, i64)>,
    pub performers: Vec<Performer>,
    pub aliases: Vec<PerformerName>,
    pub product_performers: BTreeSet<(i64, i64)>,
    pub price_history: Vec<PriceHistoryRow>,
    pub sales: Vec<ProductSale>,
}

impl MemoryState {
    fn id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub(crate) struct MemoryCatalog {
    pub state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        let guard = self.state.lock().expect("memory catalog poisoned");
        f(&guard)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| anyhow!("memory catalog poisoned"))
    }
}

#[async_trait]
impl RawContentRepo for MemoryCatalog {
    async fn find_raw_by_hash(&self, source: &str, content_hash: &str) -> Result<Option<RawContentRecord>> {
        let s = self.lock()?;
        Ok(s.raw
            .iter()
            .find(|r| r.source == source && r.content_hash == content_hash)
            .cloned())
    }

    async fn insert_raw(&self, row: &NewRawContent) -> Result<Option<i64>> {
        let mut s = self.lock()?;
        if s.raw
            .iter()
            .any(|r| r.source == row.source && r.content_hash == row.content_hash)
        {
            return Ok(None);
        }
        let id = s.id();
        s.raw.push(RawContentRecord {
            id,
            source: row.source.clone(),
            source_product_id: row.source_product_id.clone(),
            content_hash: row.content_hash.clone(),
            storage_ref: row.storage_ref.clone(),
            inline_content: row.inline_content.clone(),
            fetched_at: row.fetched_at,
            processed_at: None,
        });
        Ok(Some(id))
    }

    async fn unprocessed_raw(&self, source: &str, limit: i64) -> Result<Vec<RawContentRecord>> {
        let s = self.lock()?;
        let mut rows: Vec<RawContentRecord> = s
            .raw
            .iter()
            .filter(|r| r.source == source && r.processed_at.is_none())
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.fetched_at, r.id));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn mark_raw_processed(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let mut s = self.lock()?;
        match s.raw.iter_mut().find(|r| r.id == id && r.processed_at.is_none()) {
            Some(r) => {
                r.processed_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ProductRepo for MemoryCatalog {
    async fn find_product_source(&self, asp_name: &str, original_product_id: &str) -> Result<Option<ProductSource>> {
        let s = self.lock()?;
        Ok(s.sources
            .iter()
            .find(|p| p.asp_name == asp_name && p.original_product_id == original_product_id)
            .cloned())
    }

    async fn update_product_source(&self, id: i64, update: &SourceUpdate) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(src) = s.sources.iter_mut().find(|p| p.id == id) {
            src.price = update.price.or(src.price);
            if update.affiliate_url.is_some() {
                src.affiliate_url = update.affiliate_url.clone();
            }
        }
        Ok(())
    }

    async fn find_product_by_normalized_id(&self, normalized: &str) -> Result<Option<Product>> {
        let s = self.lock()?;
        Ok(s.products
            .iter()
            .find(|p| p.normalized_product_id == normalized)
            .cloned())
    }

    async fn replace_product_details(&self, product_id: i64, row: &NewProduct) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(p) = s.products.iter_mut().find(|p| p.id == product_id) {
            p.title = row.title.clone();
            p.description = row.description.clone();
            p.release_date = p.release_date.or(row.release_date);
            if p.default_thumbnail_url.is_none() {
                p.default_thumbnail_url = row.default_thumbnail_url.clone();
            }
        }
        Ok(())
    }

    async fn insert_product(&self, row: &NewProduct) -> Result<i64> {
        let mut s = self.lock()?;
        if let Some(p) = s
            .products
            .iter()
            .find(|p| p.normalized_product_id == row.normalized_product_id)
        {
            return Ok(p.id);
        }
        let id = s.id();
        s.products.push(Product {
            id,
            normalized_product_id: row.normalized_product_id.clone(),
            title: row.title.clone(),
            description: row.description.clone(),
            release_date: row.release_date,
            default_thumbnail_url: row.default_thumbnail_url.clone(),
        });
        Ok(id)
    }

    async fn insert_product_source(&self, row: &NewProductSource) -> Result<i64> {
        let mut s = self.lock()?;
        if let Some(p) = s.sources.iter().find(|p| {
            p.asp_name == row.asp_name && p.original_product_id == row.original_product_id
        }) {
            return Ok(p.id);
        }
        let id = s.id();
        s.sources.push(ProductSource {
            id,
            asp_name: row.asp_name.clone(),
            original_product_id: row.original_product_id.clone(),
            product_id: row.product_id,
            price: row.price,
            currency: row.currency.clone(),
            is_subscription: row.is_subscription,
            affiliate_url: row.affiliate_url.clone(),
        });
        Ok(id)
    }

    async fn link_product_tag(&self, product_id: i64, tag: &str) -> Result<bool> {
        let mut s = self.lock()?;
        let tag_id = match s.tags.get(tag) {
            Some(id) => *id,
            None => {
                let id = s.id();
                s.tags.insert(tag.to_string(), id);
                id
            }
        };
        Ok(s.product_tags.insert((product_id, tag_id)))
    }

    async fn list_products(&self, after_id: i64, limit: i64) -> Result<Vec<Product>> {
        let s = self.lock()?;
        let mut rows: Vec<Product> = s.products.iter().filter(|p| p.id > after_id).cloned().collect();
        rows.sort_by_key(|p| p.id);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn delete_product_cascade(&self, product_id: i64) -> Result<()> {
        let mut s = self.lock()?;
        let source_ids: Vec<i64> = s
            .sources
            .iter()
            .filter(|p| p.product_id == product_id)
            .map(|p| p.id)
            .collect();
        s.product_performers.retain(|(p, _)| *p != product_id);
        s.product_tags.retain(|(p, _)| *p != product_id);
        s.price_history.retain(|h| !source_ids.contains(&h.product_source_id));
        s.sales.retain(|h| !source_ids.contains(&h.product_source_id));
        s.sources.retain(|p| p.product_id != product_id);
        s.products.retain(|p| p.id != product_id);
        Ok(())
    }
}

#[async_trait]
impl PerformerRepo for MemoryCatalog {
    async fn performer_match_names(&self, min_chars: usize) -> Result<Vec<PerformerName>> {
        let s = self.lock()?;
        let names = s
            .performers
            .iter()
            .map(|p| PerformerName {
                performer_id: p.id,
                name: p.name.clone(),
            })
            .chain(s.aliases.iter().cloned())
            .filter(|n| n.name.chars().count() >= min_chars)
            .collect();
        Ok(names)
    }

    async fn find_performer_by_name(&self, name: &str) -> Result<Option<i64>> {
        let s = self.lock()?;
        Ok(s.performers.iter().find(|p| p.name == name).map(|p| p.id))
    }

    async fn find_performer_by_alias(&self, alias: &str) -> Result<Option<i64>> {
        let s = self.lock()?;
        Ok(s.aliases.iter().find(|a| a.name == alias).map(|a| a.performer_id))
    }

    async fn insert_performer(&self, name: &str, name_kana: Option<&str>) -> Result<i64> {
        let mut s = self.lock()?;
        if let Some(p) = s.performers.iter().find(|p| p.name == name) {
            return Ok(p.id);
        }
        let id = s.id();
        s.performers.push(Performer {
            id,
            name: name.to_string(),
            name_kana: name_kana.map(str::to_string),
        });
        Ok(id)
    }

    async fn add_performer_alias(&self, performer_id: i64, alias: &str) -> Result<bool> {
        let mut s = self.lock()?;
        if s.aliases.iter().any(|a| a.name == alias) {
            return Ok(false);
        }
        s.aliases.push(PerformerName {
            performer_id,
            name: alias.to_string(),
        });
        Ok(true)
    }

    async fn link_product_performer(&self, product_id: i64, performer_id: i64) -> Result<bool> {
        let mut s = self.lock()?;
        Ok(s.product_performers.insert((product_id, performer_id)))
    }

    async fn spaced_performers(&self, limit: i64) -> Result<Vec<Performer>> {
        let s = self.lock()?;
        let mut rows: Vec<Performer> = s
            .performers
            .iter()
            .filter(|p| p.name.chars().any(char::is_whitespace) && !has_latin_letter(&p.name))
            .cloned()
            .collect();
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn rename_performer(&self, performer_id: i64, name: &str) -> Result<()> {
        let mut s = self.lock()?;
        if s.performers.iter().any(|p| p.name == name && p.id != performer_id) {
            return Err(anyhow!("performer name {name} already taken"));
        }
        if let Some(p) = s.performers.iter_mut().find(|p| p.id == performer_id) {
            p.name = name.to_string();
        }
        Ok(())
    }

    async fn merge_performer(&self, duplicate_id: i64, canonical_id: i64) -> Result<()> {
        let mut s = self.lock()?;
        let Some(dup_name) = s
            .performers
            .iter()
            .find(|p| p.id == duplicate_id)
            .map(|p| p.name.clone())
        else {
            return Ok(());
        };
        let moved: Vec<(i64, i64)> = s
            .product_performers
            .iter()
            .filter(|(_, perf)| *perf == duplicate_id)
            .copied()
            .collect();
        for (product_id, _) in moved {
            s.product_performers.remove(&(product_id, duplicate_id));
            s.product_performers.insert((product_id, canonical_id));
        }
        for alias in s.aliases.iter_mut().filter(|a| a.performer_id == duplicate_id) {
            alias.performer_id = canonical_id;
        }
        s.performers.retain(|p| p.id != duplicate_id);
        if !s.aliases.iter().any(|a| a.name == dup_name) {
            s.aliases.push(PerformerName {
                performer_id: canonical_id,
                name: dup_name,
            });
        }
        Ok(())
    }

    async fn products_without_performers(&self, limit: i64) -> Result<Vec<(i64, String)>> {
        let s = self.lock()?;
        let mut rows: Vec<(i64, String)> = s
            .products
            .iter()
            .filter(|p| !s.product_performers.iter().any(|(pid, _)| *pid == p.id))
            .map(|p| (p.id, p.title.clone()))
            .collect();
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl PriceRepo for MemoryCatalog {
    async fn append_price_history(&self, row: &PriceHistoryRow) -> Result<()> {
        self.lock()?.price_history.push(row.clone());
        Ok(())
    }

    async fn active_sale(&self, product_source_id: i64) -> Result<Option<ProductSale>> {
        let s = self.lock()?;
        Ok(s.sales
            .iter()
            .find(|x| x.product_source_id == product_source_id && x.is_active)
            .cloned())
    }

    async fn insert_sale(&self, row: &NewSale) -> Result<Option<i64>> {
        let mut s = self.lock()?;
        if s.sales
            .iter()
            .any(|x| x.product_source_id == row.product_source_id && x.is_active)
        {
            return Ok(None);
        }
        let id = s.id();
        s.sales.push(ProductSale {
            id,
            product_source_id: row.product_source_id,
            regular_price: row.regular_price,
            sale_price: row.sale_price,
            discount_percent: row.discount_percent,
            start_at: row.start_at,
            end_at: row.end_at,
            is_active: true,
        });
        Ok(Some(id))
    }

    async fn update_active_sale(&self, sale_id: i64, sale_price: i64, discount_percent: i32, end_at: Option<DateTime<Utc>>) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(x) = s.sales.iter_mut().find(|x| x.id == sale_id && x.is_active) {
            x.sale_price = sale_price;
            x.discount_percent = discount_percent;
            x.end_at = end_at.or(x.end_at);
        }
        Ok(())
    }

    async fn deactivate_sale(&self, sale_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut s = self.lock()?;
        if let Some(x) = s.sales.iter_mut().find(|x| x.id == sale_id) {
            x.is_active = false;
            x.end_at = Some(x.end_at.map_or(at, |e| e.min(at)));
        }
        Ok(())
    }

    async fn sales_due_to_expire(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ProductSale>> {
        let s = self.lock()?;
        let mut due: Vec<ProductSale> = s
            .sales
            .iter()
            .filter(|x| x.is_active && x.end_at.is_some_and(|e| e <= now))
            .cloned()
            .collect();
        due.sort_by_key(|x| (x.end_at, x.id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn monthly_sale_counts(&self, product_source_id: Option<i64>) -> Result<Vec<MonthlySaleCounts>> {
        let s = self.lock()?;
        let mut by_month: HashMap<u32, MonthlySaleCounts> = HashMap::new();
        for h in s
            .price_history
            .iter()
            .filter(|h| product_source_id.map_or(true, |id| id == h.product_source_id))
        {
            let month = h.recorded_at.month();
            let entry = by_month.entry(month).or_insert(MonthlySaleCounts {
                month,
                ..Default::default()
            });
            entry.observations += 1;
            if h.sale_price.is_some_and(|sp| sp < h.price) {
                entry.discounted += 1;
                entry.discount_sum += i64::from(h.discount_percent.unwrap_or(0));
            }
        }
        let mut rows: Vec<MonthlySaleCounts> = by_month.into_values().collect();
        rows.sort_by_key(|m| m.month);
        Ok(rows)
    }

    async fn sale_summary(&self) -> Result<SaleSummary> {
        let s = self.lock()?;
        let active: Vec<&ProductSale> = s.sales.iter().filter(|x| x.is_active).collect();
        let average_discount = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|x| f64::from(x.discount_percent)).sum::<f64>() / active.len() as f64
        };
        Ok(SaleSummary {
            active_sales: active.len() as i64,
            average_discount,
        })
    }
}
