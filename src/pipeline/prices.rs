//! Price ledger and per-listing sale state machine.
use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::catalog::{MonthlySaleCounts, NewSale, PriceHistoryRow, PriceRepo};

/// One price reading of one listing.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceObservation {
    pub product_source_id: i64,
    pub price: i64,
    pub sale_price: Option<i64>,
    pub discount_percent: Option<i32>,
    /// Announced end of the promotion, when the source publishes one.
    pub sale_ends_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleTransition {
    NoSale,
    Started { sale_id: i64 },
    Continued { sale_id: i64 },
    Ended { sale_id: i64 },
}

/// Sale price and discount filled in from each other. `None` unless the
/// listing is actually discounted.
pub fn effective_discount(
    price: i64,
    sale_price: Option<i64>,
    discount_percent: Option<i32>,
) -> Option<(i64, i32)> {
    if price <= 0 {
        return None;
    }
    let (sale, pct) = match (sale_price, discount_percent) {
        (Some(sp), Some(d)) => (sp, d),
        (Some(sp), None) => {
            let derived = ((price - sp) as f64 * 100.0 / price as f64).round() as i32;
            (sp, derived)
        }
        (None, Some(d)) if d > 0 && d < 100 => {
            (((price as f64) * f64::from(100 - d) / 100.0).round() as i64, d)
        }
        _ => return None,
    };
    (sale < price && pct > 0).then_some((sale, pct))
}

/// Appends the observation to the ledger, then advances the listing's sale state.
#[instrument(skip(repo, obs), fields(product_source_id = obs.product_source_id))]
pub async fn record_price_observation<R: PriceRepo + ?Sized>(
    repo: &R,
    obs: &PriceObservation,
) -> Result<SaleTransition> {
    // A promo banner whose announced end has passed is stale page content.
    let announced_over = obs.sale_ends_at.is_some_and(|end| end <= obs.observed_at);
    let discount = effective_discount(obs.price, obs.sale_price, obs.discount_percent)
        .filter(|_| !announced_over);
    repo.append_price_history(&PriceHistoryRow {
        product_source_id: obs.product_source_id,
        recorded_at: obs.observed_at,
        price: obs.price,
        sale_price: discount.map(|(sp, _)| sp),
        discount_percent: discount.map(|(_, d)| d),
    })
    .await?;

    let active = repo.active_sale(obs.product_source_id).await?;

    match (discount, active) {
        (None, None) => Ok(SaleTransition::NoSale),
        (None, Some(sale)) => {
            let at = sale.end_at.filter(|e| *e <= obs.observed_at).unwrap_or(obs.observed_at);
            repo.deactivate_sale(sale.id, at).await?;
            info!(sale_id = sale.id, "sale ended");
            Ok(SaleTransition::Ended { sale_id: sale.id })
        }
        (Some((sale_price, pct)), Some(sale))
            if sale.end_at.map_or(true, |end| end > obs.observed_at) =>
        {
            if sale.sale_price != sale_price || sale.discount_percent != pct || obs.sale_ends_at.is_some() {
                repo.update_active_sale(sale.id, sale_price, pct, obs.sale_ends_at).await?;
            }
            debug!(sale_id = sale.id, sale_price, pct, "sale continues");
            Ok(SaleTransition::Continued { sale_id: sale.id })
        }
        (Some((sale_price, pct)), stale) => {
            // A discount seen after the previous promo's announced end is a new promo.
            if let Some(old) = stale {
                let ended_at = old.end_at.unwrap_or(obs.observed_at);
                repo.deactivate_sale(old.id, ended_at).await?;
                info!(sale_id = old.id, "previous sale expired");
            }
            let row = NewSale {
                product_source_id: obs.product_source_id,
                regular_price: obs.price,
                sale_price,
                discount_percent: pct,
                start_at: obs.observed_at,
                end_at: obs.sale_ends_at,
            };
            match repo.insert_sale(&row).await? {
                Some(sale_id) => {
                    info!(sale_id, sale_price, pct, "sale started");
                    Ok(SaleTransition::Started { sale_id })
                }
                // Another writer opened the sale first; treat ours as a continuation.
                None => match repo.active_sale(obs.product_source_id).await? {
                    Some(sale) => {
                        repo.update_active_sale(sale.id, sale_price, pct, obs.sale_ends_at).await?;
                        Ok(SaleTransition::Continued { sale_id: sale.id })
                    }
                    None => Ok(SaleTransition::NoSale),
                },
            }
        }
    }
}

/// Deactivates up to `limit` active sales whose announced end has passed.
/// Each sale is closed at its own `end_at`.
#[instrument(skip(repo))]
pub async fn expire_sales<R: PriceRepo + ?Sized>(
    repo: &R,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<u64> {
    let due = repo.sales_due_to_expire(now, limit).await?;
    for sale in &due {
        repo.deactivate_sale(sale.id, sale.end_at.unwrap_or(now)).await?;
        debug!(sale_id = sale.id, product_source_id = sale.product_source_id, "sale expired");
    }
    info!(expired = due.len(), "expired sales");
    Ok(due.len() as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthProbability {
    pub month: u32,
    pub probability: f64,
    pub observations: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalePrediction {
    /// January..December.
    pub monthly: Vec<MonthProbability>,
    pub next_30_days_probability: f64,
    pub typical_discount: f64,
    pub sample_size: i64,
}

/// Seasonality estimate from monthly observation counts. Each month's
/// probability is `discounted / (observations + 2)`, which stays near zero
/// while data is sparse.
pub fn predict_sales(counts: &[MonthlySaleCounts], now: DateTime<Utc>) -> SalePrediction {
    let monthly: Vec<MonthProbability> = (1..=12u32)
        .map(|month| {
            let c = counts.iter().find(|c| c.month == month).copied().unwrap_or_default();
            MonthProbability {
                month,
                probability: c.discounted as f64 / (c.observations + 2) as f64,
                observations: c.observations,
            }
        })
        .collect();

    let current = now.month();
    let next = current % 12 + 1;
    let p = |m: u32| monthly[(m - 1) as usize].probability;
    let discounted: i64 = counts.iter().map(|c| c.discounted).sum();
    let discount_sum: i64 = counts.iter().map(|c| c.discount_sum).sum();

    SalePrediction {
        next_30_days_probability: (p(current) + p(next)) / 2.0,
        typical_discount: if discounted > 0 {
            discount_sum as f64 / discounted as f64
        } else {
            0.0
        },
        sample_size: counts.iter().map(|c| c.observations).sum(),
        monthly,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::DryRunCatalog;
    use chrono::{Duration, TimeZone};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn obs(price: i64, sale_price: Option<i64>, day: u32) -> PriceObservation {
        PriceObservation {
            product_source_id: 42,
            price,
            sale_price,
            discount_percent: None,
            sale_ends_at: None,
            observed_at: at(day),
        }
    }

    fn active_count(repo: &MemoryCatalog) -> usize {
        repo.with(|s| s.sales.iter().filter(|x| x.product_source_id == 42 && x.is_active).count())
    }

    fn all_active(repo: &MemoryCatalog) -> usize {
        repo.with(|s| s.sales.iter().filter(|x| x.is_active).count())
    }

    #[test]
    fn derives_missing_discount_fields() {
        assert_eq!(effective_discount(5000, Some(3000), None), Some((3000, 40)));
        assert_eq!(effective_discount(5000, None, Some(20)), Some((4000, 20)));
        assert_eq!(effective_discount(5000, Some(5000), None), None);
        assert_eq!(effective_discount(5000, Some(6000), Some(10)), None);
        assert_eq!(effective_discount(0, Some(0), None), None);
    }

    #[tokio::test]
    async fn sale_lifecycle_produces_one_row() {
        let repo = MemoryCatalog::new();
        let steps = [
            (obs(5000, None, 1), false),
            (obs(5000, Some(3000), 2), true),
            (obs(5000, Some(3000), 3), true),
            (obs(5000, None, 4), false),
        ];
        let mut transitions = Vec::new();
        for (o, active_after) in &steps {
            transitions.push(record_price_observation(&repo, o).await.unwrap());
            assert_eq!(active_count(&repo), usize::from(*active_after));
        }
        let sale_id = match transitions[1] {
            SaleTransition::Started { sale_id } => sale_id,
            other => panic!("expected start, got {other:?}"),
        };
        assert_eq!(
            transitions,
            vec![
                SaleTransition::NoSale,
                SaleTransition::Started { sale_id },
                SaleTransition::Continued { sale_id },
                SaleTransition::Ended { sale_id },
            ]
        );
        repo.with(|s| {
            assert_eq!(s.price_history.len(), 4);
            assert_eq!(s.sales.len(), 1);
            let sale = &s.sales[0];
            assert!(!sale.is_active);
            assert_eq!(sale.start_at, at(2));
            assert_eq!(sale.end_at, Some(at(4)));
            assert_eq!(sale.discount_percent, 40);
        });
    }

    #[tokio::test]
    async fn changing_promo_updates_in_place() {
        let repo = MemoryCatalog::new();
        record_price_observation(&repo, &obs(5000, Some(4000), 1)).await.unwrap();
        let t = record_price_observation(&repo, &obs(5000, Some(2500), 2)).await.unwrap();
        assert!(matches!(t, SaleTransition::Continued { .. }));
        repo.with(|s| {
            assert_eq!(s.sales.len(), 1);
            assert_eq!(s.sales[0].sale_price, 2500);
            assert_eq!(s.sales[0].discount_percent, 50);
        });
    }

    #[tokio::test]
    async fn discount_after_announced_end_opens_new_sale() {
        let repo = MemoryCatalog::new();
        let mut first = obs(5000, Some(3000), 1);
        first.sale_ends_at = Some(at(3));
        record_price_observation(&repo, &first).await.unwrap();
        let t = record_price_observation(&repo, &obs(5000, Some(3500), 10)).await.unwrap();
        assert!(matches!(t, SaleTransition::Started { .. }));
        assert_eq!(active_count(&repo), 1);
        repo.with(|s| {
            assert_eq!(s.sales.len(), 2);
            assert_eq!(s.sales[0].end_at, Some(at(3)));
        });
    }

    #[tokio::test]
    async fn expiry_deactivates_past_end() {
        let repo = MemoryCatalog::new();
        let mut o = obs(5000, Some(3000), 1);
        o.sale_ends_at = Some(at(1) + Duration::days(2));
        record_price_observation(&repo, &o).await.unwrap();
        assert_eq!(expire_sales(&repo, at(2), 100).await.unwrap(), 0);
        assert_eq!(expire_sales(&repo, at(5), 100).await.unwrap(), 1);
        assert_eq!(active_count(&repo), 0);
        repo.with(|s| assert_eq!(s.sales[0].end_at, Some(at(3))));
    }

    async fn open_sales_ending(repo: &MemoryCatalog, days: &[u32]) {
        for (i, day) in days.iter().enumerate() {
            let mut o = obs(5000, Some(3000), 1);
            o.product_source_id = 100 + i as i64;
            o.sale_ends_at = Some(at(*day));
            record_price_observation(repo, &o).await.unwrap();
        }
    }

    #[tokio::test]
    async fn expiry_respects_limit() {
        let repo = MemoryCatalog::new();
        open_sales_ending(&repo, &[2, 3, 4]).await;
        assert_eq!(expire_sales(&repo, at(10), 0).await.unwrap(), 0);
        assert_eq!(all_active(&repo), 3);
        assert_eq!(expire_sales(&repo, at(10), 2).await.unwrap(), 2);
        assert_eq!(all_active(&repo), 1);
        // Oldest announced ends go first.
        repo.with(|s| {
            let still_active: Vec<_> = s.sales.iter().filter(|x| x.is_active).collect();
            assert_eq!(still_active[0].end_at, Some(at(4)));
        });
    }

    #[tokio::test]
    async fn dry_run_expiry_reports_without_closing() {
        let repo = MemoryCatalog::new();
        open_sales_ending(&repo, &[2, 3, 4]).await;
        let dry = DryRunCatalog::new(&repo);
        assert_eq!(expire_sales(&dry, at(10), 100).await.unwrap(), 3);
        assert_eq!(dry.intended_writes(), 3);
        assert_eq!(all_active(&repo), 3);
    }

    #[tokio::test]
    async fn stale_promo_banner_is_recorded_at_full_price() {
        let repo = MemoryCatalog::new();
        let mut o = obs(5000, Some(3000), 10);
        o.sale_ends_at = Some(at(3));
        let t = record_price_observation(&repo, &o).await.unwrap();
        assert_eq!(t, SaleTransition::NoSale);
        repo.with(|s| {
            assert_eq!(s.price_history.len(), 1);
            assert_eq!(s.price_history[0].price, 5000);
            assert_eq!(s.price_history[0].sale_price, None);
            assert_eq!(s.price_history[0].discount_percent, None);
            assert!(s.sales.is_empty());
        });
    }

    #[test]
    fn prediction_tolerates_no_history() {
        let p = predict_sales(&[], at(1));
        assert_eq!(p.monthly.len(), 12);
        assert!(p.monthly.iter().all(|m| m.probability == 0.0));
        assert_eq!(p.next_30_days_probability, 0.0);
        assert_eq!(p.typical_discount, 0.0);
        assert_eq!(p.sample_size, 0);
    }

    #[test]
    fn prediction_weights_sparse_months_down() {
        let counts = [
            MonthlySaleCounts { month: 5, observations: 1, discounted: 1, discount_sum: 30 },
            MonthlySaleCounts { month: 6, observations: 8, discounted: 6, discount_sum: 240 },
        ];
        let p = predict_sales(&counts, at(1));
        assert!((p.monthly[4].probability - 1.0 / 3.0).abs() < 1e-9);
        assert!((p.monthly[5].probability - 0.6).abs() < 1e-9);
        assert!((p.next_30_days_probability - (1.0 / 3.0 + 0.6) / 2.0).abs() < 1e-9);
        assert!((p.typical_discount - 270.0 / 7.0).abs() < 1e-9);
        assert_eq!(p.sample_size, 9);
    }

    #[test]
    fn december_rolls_over_to_january() {
        let counts = [MonthlySaleCounts { month: 1, observations: 2, discounted: 2, discount_sum: 20 }];
        let p = predict_sales(&counts, Utc.with_ymd_and_hms(2024, 12, 20, 0, 0, 0).unwrap());
        assert!((p.next_30_days_probability - 0.25).abs() < 1e-9);
    }
}
