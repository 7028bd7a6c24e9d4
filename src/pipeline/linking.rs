//! Maps (ASP, source-native id) pairs onto canonical products.
use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{NewProduct, NewProductSource, ProductRepo, SourceUpdate};
use crate::config::SourceConfig;
use crate::normalization::listing::{check_listing, InvalidListing};
use crate::normalization::product_id::{normalize_product_id, IdRule};
use crate::parsers::ParsedListing;

/// Per-source settings needed to link a listing.
#[derive(Debug, Clone)]
pub struct LinkTarget {
    pub asp_name: String,
    pub id_rule: IdRule,
    pub currency: String,
    pub is_subscription: bool,
}

impl LinkTarget {
    pub fn new(asp_name: impl Into<String>) -> Self {
        Self {
            asp_name: asp_name.into(),
            id_rule: IdRule::default(),
            currency: "JPY".to_string(),
            is_subscription: false,
        }
    }

    pub fn from_config(asp_name: &str, source: &SourceConfig) -> Self {
        Self {
            asp_name: asp_name.to_string(),
            id_rule: source.id_rule.clone(),
            currency: source.currency.clone(),
            is_subscription: source.is_subscription,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Known listing; mutable fields refreshed in place.
    Updated { product_id: i64, product_source_id: i64 },
    /// New listing for a product another source already created.
    Attached { product_id: i64, product_source_id: i64 },
    /// New listing and new product.
    Created { product_id: i64, product_source_id: i64 },
    Invalid(InvalidListing),
    /// The id normalizes to nothing under the source's rule.
    UnusableId,
}

impl LinkOutcome {
    pub fn product_id(&self) -> Option<i64> {
        match self {
            LinkOutcome::Updated { product_id, .. }
            | LinkOutcome::Attached { product_id, .. }
            | LinkOutcome::Created { product_id, .. } => Some(*product_id),
            LinkOutcome::Invalid(_) | LinkOutcome::UnusableId => None,
        }
    }

    pub fn product_source_id(&self) -> Option<i64> {
        match self {
            LinkOutcome::Updated { product_source_id, .. }
            | LinkOutcome::Attached { product_source_id, .. }
            | LinkOutcome::Created { product_source_id, .. } => Some(*product_source_id),
            LinkOutcome::Invalid(_) | LinkOutcome::UnusableId => None,
        }
    }
}

#[instrument(skip(repo, target, listing), fields(asp = %target.asp_name))]
pub async fn link_source<R: ProductRepo + ?Sized>(
    repo: &R,
    target: &LinkTarget,
    original_product_id: &str,
    listing: &ParsedListing,
) -> Result<LinkOutcome> {
    if let Some(reason) = check_listing(&listing.title, listing.description.as_deref()) {
        info!(original_id = original_product_id, reason = reason.as_str(), "invalid listing; not linked");
        return Ok(LinkOutcome::Invalid(reason));
    }

    if let Some(existing) = repo
        .find_product_source(&target.asp_name, original_product_id)
        .await?
    {
        let update = SourceUpdate {
            price: listing.price,
            affiliate_url: listing.affiliate_url.clone(),
        };
        if update.price != existing.price
            || (update.affiliate_url.is_some() && update.affiliate_url != existing.affiliate_url)
        {
            repo.update_product_source(existing.id, &update).await?;
            debug!(product_source_id = existing.id, "refreshed listing fields");
        }
        return Ok(LinkOutcome::Updated {
            product_id: existing.product_id,
            product_source_id: existing.id,
        });
    }

    let Some(normalized) = normalize_product_id(original_product_id, &target.id_rule) else {
        warn!(original_id = original_product_id, "product id does not normalize; skipping");
        return Ok(LinkOutcome::UnusableId);
    };

    let details = NewProduct {
        normalized_product_id: normalized.clone(),
        title: listing.title.trim().to_string(),
        description: listing.description.clone(),
        release_date: listing.release_date,
        default_thumbnail_url: listing.thumbnail_url.clone(),
    };
    let (product_id, created) = match repo.find_product_by_normalized_id(&normalized).await? {
        Some(product) => {
            // A placeholder scrape from another storefront got there first.
            if let Some(reason) = check_listing(&product.title, product.description.as_deref()) {
                repo.replace_product_details(product.id, &details).await?;
                info!(product_id = product.id, replaced = reason.as_str(), "replaced placeholder product details");
            }
            (product.id, false)
        }
        None => (repo.insert_product(&details).await?, true),
    };

    let product_source_id = repo
        .insert_product_source(&NewProductSource {
            asp_name: target.asp_name.clone(),
            original_product_id: original_product_id.to_string(),
            product_id,
            price: listing.price,
            currency: target.currency.clone(),
            is_subscription: target.is_subscription,
            affiliate_url: listing.affiliate_url.clone(),
        })
        .await?;

    info!(original_id = original_product_id, %normalized, product_id, created, "linked listing");
    Ok(if created {
        LinkOutcome::Created {
            product_id,
            product_source_id,
        }
    } else {
        LinkOutcome::Attached {
            product_id,
            product_source_id,
        }
    })
}

/// Link every tag; returns how many new link rows were written.
pub async fn link_tags<R: ProductRepo + ?Sized>(
    repo: &R,
    product_id: i64,
    tags: &[String],
) -> Result<usize> {
    let mut linked = 0;
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if repo.link_product_tag(product_id, tag).await? {
            linked += 1;
        }
    }
    Ok(linked)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub deleted: usize,
}

/// Delete products whose stored data is a placeholder scrape, cascading
/// through link tables, price history and sales. Stops after `limit` deletions.
#[instrument(skip(repo))]
pub async fn cleanup_invalid_products<R: ProductRepo + ?Sized>(
    repo: &R,
    limit: usize,
    page_size: i64,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if limit == 0 {
        return Ok(report);
    }
    let mut after_id = 0;
    loop {
        let page = repo.list_products(after_id, page_size).await?;
        let Some(last) = page.last() else { break };
        after_id = last.id;
        for product in &page {
            report.scanned += 1;
            if let Some(reason) = check_listing(&product.title, product.description.as_deref()) {
                if report.deleted >= limit {
                    return Ok(report);
                }
                info!(product_id = product.id, normalized = %product.normalized_product_id,
                    reason = reason.as_str(), "deleting invalid product");
                repo.delete_product_cascade(product.id).await?;
                report.deleted += 1;
            }
        }
    }
    Ok(report)
}
