//! Batch drivers: each walks a bounded work list sequentially and keeps going
//! past per-item failures, which are logged and counted.
use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog::{CatalogStore, RawContentRecord};
use crate::config::SourcesConfig;
use crate::fetch::{fetch_bytes, RequestPacer, RetryOptions};
use crate::parsers::ParserRegistry;
use crate::pipeline::linking::{link_source, link_tags, LinkOutcome, LinkTarget};
use crate::pipeline::performers::{link_performers, resolve_performers, PerformerResolver};
use crate::pipeline::prices::{record_price_observation, PriceObservation, SaleTransition};
use crate::raw_store::{RawContentStore, SaveOutcome};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Items that completed (stored, linked or marked processed).
    pub processed: usize,
    pub created: usize,
    pub attached: usize,
    pub updated: usize,
    pub duplicates: usize,
    pub invalid: usize,
    /// Items left for a later run (fetch or parse failures).
    pub skipped: usize,
    pub failed: usize,
    pub performer_links: usize,
    pub tag_links: usize,
    pub sales_started: usize,
    pub sales_ended: usize,
}

impl BatchReport {
    pub fn log(&self, stage: &str) {
        info!(
            stage,
            processed = self.processed,
            created = self.created,
            attached = self.attached,
            updated = self.updated,
            duplicates = self.duplicates,
            invalid = self.invalid,
            skipped = self.skipped,
            failed = self.failed,
            performer_links = self.performer_links,
            tag_links = self.tag_links,
            sales_started = self.sales_started,
            sales_ended = self.sales_ended,
            "batch complete"
        );
    }
}

/// Fetch detail pages for `ids` and persist them through the raw store.
#[allow(clippy::too_many_arguments)]
#[instrument(skip(client, pacer, store, repo, sources, ids, retry), fields(count = ids.len()))]
pub async fn crawl_batch<R: CatalogStore + ?Sized>(
    client: &Client,
    pacer: &RequestPacer,
    store: &RawContentStore,
    repo: &R,
    sources: &SourcesConfig,
    source: &str,
    ids: &[String],
    retry: &RetryOptions,
) -> Result<BatchReport> {
    let config = sources
        .get(source)
        .ok_or_else(|| anyhow::anyhow!("source {source} is not configured"))?;
    let mut report = BatchReport::default();
    for id in ids.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        pacer.wait().await;
        let url = config.detail_url(id);
        let body = match fetch_bytes(client, &url, retry).await {
            Ok(body) => body,
            Err(err) => {
                warn!(source, original_id = id, error = %err, "fetch failed; skipping");
                report.skipped += 1;
                continue;
            }
        };
        match store.save_raw(repo, source, id, body).await {
            Ok(SaveOutcome::Duplicate { .. }) => report.duplicates += 1,
            Ok(SaveOutcome::Inserted { .. }) => report.processed += 1,
            Err(err) => {
                warn!(source, original_id = id, error = %err, "saving raw content failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

/// Parse and link unprocessed raw records of `source`, oldest first.
#[instrument(skip(repo, store, registry, sources))]
pub async fn process_raw_batch<R: CatalogStore + ?Sized>(
    repo: &R,
    store: &RawContentStore,
    registry: &ParserRegistry,
    sources: &SourcesConfig,
    source: &str,
    limit: i64,
) -> Result<BatchReport> {
    let target = sources
        .get(source)
        .map(|cfg| LinkTarget::from_config(source, cfg))
        .unwrap_or_else(|| LinkTarget::new(source));
    let mut resolver = PerformerResolver::load(repo).await?;
    let mut report = BatchReport::default();

    for record in repo.unprocessed_raw(source, limit).await? {
        if let Err(err) = process_record(repo, store, registry, &target, &mut resolver, &record, &mut report).await {
            warn!(raw_id = record.id, original_id = %record.source_product_id, error = %err, "processing failed");
            report.failed += 1;
        }
    }
    Ok(report)
}

async fn process_record<R: CatalogStore + ?Sized>(
    repo: &R,
    store: &RawContentStore,
    registry: &ParserRegistry,
    target: &LinkTarget,
    resolver: &mut PerformerResolver,
    record: &RawContentRecord,
    report: &mut BatchReport,
) -> Result<()> {
    let Some(content) = store.load(record).await else {
        warn!(raw_id = record.id, "raw content unavailable; leaving unprocessed");
        report.skipped += 1;
        return Ok(());
    };
    let listing = match registry.parse(&record.source, &content) {
        Ok(listing) => listing,
        Err(err) => {
            warn!(raw_id = record.id, original_id = %record.source_product_id, error = %err, "parse failed; leaving unprocessed");
            report.skipped += 1;
            return Ok(());
        }
    };

    let outcome = link_source(repo, target, &record.source_product_id, &listing).await?;
    match outcome {
        LinkOutcome::Created { .. } => report.created += 1,
        LinkOutcome::Attached { .. } => report.attached += 1,
        LinkOutcome::Updated { .. } => report.updated += 1,
        LinkOutcome::Invalid(_) | LinkOutcome::UnusableId => report.invalid += 1,
    }

    if let (Some(product_id), Some(product_source_id)) = (outcome.product_id(), outcome.product_source_id()) {
        report.tag_links += link_tags(repo, product_id, &listing.tags).await?;
        let performer_ids = resolve_performers(repo, resolver, &listing.title, &listing.performers).await?;
        report.performer_links += link_performers(repo, product_id, &performer_ids).await?;

        if let Some(price) = listing.price {
            let transition = record_price_observation(
                repo,
                &PriceObservation {
                    product_source_id,
                    price,
                    sale_price: listing.sale_price,
                    discount_percent: listing.discount_percent,
                    sale_ends_at: listing.sale_ends_at,
                    observed_at: record.fetched_at,
                },
            )
            .await?;
            match transition {
                SaleTransition::Started { .. } => report.sales_started += 1,
                SaleTransition::Ended { .. } => report.sales_ended += 1,
                SaleTransition::NoSale | SaleTransition::Continued { .. } => {}
            }
        }
    }

    repo.mark_raw_processed(record.id, Utc::now()).await?;
    report.processed += 1;
    Ok(())
}

/// Resolve performers for products that have none linked yet.
#[instrument(skip(repo))]
pub async fn backfill_performers<R: CatalogStore + ?Sized>(repo: &R, limit: i64) -> Result<BatchReport> {
    let mut resolver = PerformerResolver::load(repo).await?;
    let mut report = BatchReport::default();
    for (product_id, title) in repo.products_without_performers(limit).await? {
        match resolve_performers(repo, &mut resolver, &title, &[]).await {
            Ok(ids) if ids.is_empty() => report.skipped += 1,
            Ok(ids) => {
                report.performer_links += link_performers(repo, product_id, &ids).await?;
                report.processed += 1;
            }
            Err(err) => {
                warn!(product_id, error = %err, "performer resolution failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::RawContentRepo;
    use bytes::Bytes;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SOURCES: &str = r#"{
        "TEST": {
            "detail_url_template": "http://placeholder/{id}",
            "fields": {
                "title": { "kind": "pointer", "pointer": "/title" },
                "price": { "kind": "pointer", "pointer": "/price" },
                "sale_price": { "kind": "pointer", "pointer": "/sale_price" },
                "performers": { "kind": "pointer", "pointer": "/actors" },
                "tags": { "kind": "pointer", "pointer": "/genres" }
            }
        }
    }"#;

    fn sources() -> SourcesConfig {
        SourcesConfig::from_json(SOURCES).unwrap()
    }

    async fn save(repo: &MemoryCatalog, id: &str, body: &str) {
        RawContentStore::disabled()
            .save_raw(repo, "TEST", id, Bytes::from(body.to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn processes_valid_and_marks_invalid_but_not_unparseable() {
        let repo = MemoryCatalog::new();
        save(&repo, "259LUXU1010", r#"{"title":"ラグジュTV 1010 美女","price":"5000","sale_price":"3000","actors":["ASUKA"],"genres":["美少女"]}"#).await;
        save(&repo, "ABC001", r#"{"title":"年齢認証"}"#).await;
        save(&repo, "BROKEN", "<html>not json</html>").await;

        let registry = ParserRegistry::from_sources(&sources());
        let store = RawContentStore::disabled();
        let report = process_raw_batch(&repo, &store, &registry, &sources(), "TEST", 10).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 2);
        assert_eq!(report.performer_links, 1);
        assert_eq!(report.tag_links, 1);
        assert_eq!(report.sales_started, 1);

        let pending = repo.unprocessed_raw("TEST", 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].source_product_id, "BROKEN");

        let again = process_raw_batch(&repo, &store, &registry, &sources(), "TEST", 10).await.unwrap();
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn recrawled_price_updates_existing_listing() {
        let repo = MemoryCatalog::new();
        let registry = ParserRegistry::from_sources(&sources());
        let store = RawContentStore::disabled();
        save(&repo, "259LUXU1010", r#"{"title":"ラグジュTV 1010 美女","price":"5000"}"#).await;
        process_raw_batch(&repo, &store, &registry, &sources(), "TEST", 10).await.unwrap();
        save(&repo, "259LUXU1010", r#"{"title":"ラグジュTV 1010 美女","price":"4200"}"#).await;
        let report = process_raw_batch(&repo, &store, &registry, &sources(), "TEST", 10).await.unwrap();
        assert_eq!(report.updated, 1);
        repo.with(|s| {
            assert_eq!(s.products.len(), 1);
            assert_eq!(s.products[0].normalized_product_id, "259LUXU-1010");
            assert_eq!(s.sources[0].price, Some(4200));
            assert_eq!(s.price_history.len(), 2);
        });
    }

    #[tokio::test]
    async fn crawl_stores_once_and_skips_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/ABC-001"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"title":"x"}"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/item/GONE-404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut sources = sources();
        if let Some(cfg) = sources.sources.get_mut("TEST") {
            cfg.detail_url_template = format!("{}/item/{{id}}", server.uri());
        }
        let repo = MemoryCatalog::new();
        let client = Client::new();
        let pacer = RequestPacer::new(Duration::ZERO);
        let retry = RetryOptions {
            max_retries: 0,
            ..RetryOptions::default()
        };
        let ids = vec!["ABC-001".to_string(), "GONE-404".to_string()];
        let store = RawContentStore::disabled();

        let first = crawl_batch(&client, &pacer, &store, &repo, &sources, "TEST", &ids, &retry).await.unwrap();
        assert_eq!((first.processed, first.skipped), (1, 1));
        let second = crawl_batch(&client, &pacer, &store, &repo, &sources, "TEST", &ids, &retry).await.unwrap();
        assert_eq!((second.processed, second.duplicates), (0, 1));
        assert_eq!(repo.with(|s| s.raw.len()), 1);
    }

    #[tokio::test]
    async fn backfill_links_performers_from_titles() {
        let repo = MemoryCatalog::new();
        let registry = ParserRegistry::from_sources(&sources());
        save(&repo, "SSIS001", r#"{"title":"新作 配信 三上悠亜"}"#).await;
        save(&repo, "SSIS002", r#"{"title":"素人 総集編"}"#).await;
        process_raw_batch(&repo, &RawContentStore::disabled(), &registry, &sources(), "TEST", 10)
            .await
            .unwrap();
        // Processing already linked the tail name; drop links to exercise the backfill.
        repo.state.lock().unwrap().product_performers.clear();

        let report = backfill_performers(&repo, 10).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.performer_links, 1);
        assert_eq!(repo.with(|s| s.performers.len()), 1);
    }
}
