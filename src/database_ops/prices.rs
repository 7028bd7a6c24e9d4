use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;

use crate::catalog::{MonthlySaleCounts, NewSale, PriceHistoryRow, PriceRepo, ProductSale, SaleSummary};
use crate::database_ops::db::Db;

const SALE_COLUMNS: &str = "id, product_source_id, regular_price, sale_price, discount_percent, \
                            start_at, end_at, is_active";

fn sale_from_row(r: &PgRow) -> Result<ProductSale> {
    Ok(ProductSale {
        id: r.try_get("id")?,
        product_source_id: r.try_get("product_source_id")?,
        regular_price: r.try_get("regular_price")?,
        sale_price: r.try_get("sale_price")?,
        discount_percent: r.try_get("discount_percent")?,
        start_at: r.try_get("start_at")?,
        end_at: r.try_get("end_at")?,
        is_active: r.try_get("is_active")?,
    })
}

#[async_trait]
impl PriceRepo for Db {
    #[instrument(skip(self, row), fields(product_source_id = row.product_source_id))]
    async fn append_price_history(&self, row: &PriceHistoryRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO price_history \
                (product_source_id, recorded_at, price, sale_price, discount_percent) \
             VALUES ($1,$2,$3,$4,$5)",
        )
        .persistent(false)
        .bind(row.product_source_id)
        .bind(row.recorded_at)
        .bind(row.price)
        .bind(row.sale_price)
        .bind(row.discount_percent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn active_sale(&self, product_source_id: i64) -> Result<Option<ProductSale>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM product_sales WHERE product_source_id = $1 AND is_active"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(product_source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(sale_from_row).transpose()
    }

    #[instrument(skip(self, row), fields(product_source_id = row.product_source_id))]
    async fn insert_sale(&self, row: &NewSale) -> Result<Option<i64>> {
        // Conflict target is the partial unique index on active sales.
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO product_sales \
                (product_source_id, regular_price, sale_price, discount_percent, start_at, end_at, is_active) \
             VALUES ($1,$2,$3,$4,$5,$6,true) \
             ON CONFLICT (product_source_id) WHERE is_active DO NOTHING \
             RETURNING id",
        )
        .persistent(false)
        .bind(row.product_source_id)
        .bind(row.regular_price)
        .bind(row.sale_price)
        .bind(row.discount_percent)
        .bind(row.start_at)
        .bind(row.end_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn update_active_sale(
        &self,
        sale_id: i64,
        sale_price: i64,
        discount_percent: i32,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE product_sales \
             SET sale_price = $2, discount_percent = $3, end_at = COALESCE($4, end_at) \
             WHERE id = $1 AND is_active",
        )
        .persistent(false)
        .bind(sale_id)
        .bind(sale_price)
        .bind(discount_percent)
        .bind(end_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate_sale(&self, sale_id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE product_sales \
             SET is_active = false, end_at = LEAST(COALESCE(end_at, $2), $2) \
             WHERE id = $1",
        )
        .persistent(false)
        .bind(sale_id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn sales_due_to_expire(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ProductSale>> {
        let sql = format!(
            "SELECT {SALE_COLUMNS} FROM product_sales \
             WHERE is_active AND end_at <= $1 \
             ORDER BY end_at, id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(sale_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn monthly_sale_counts(
        &self,
        product_source_id: Option<i64>,
    ) -> Result<Vec<MonthlySaleCounts>> {
        let rows = sqlx::query(
            "SELECT EXTRACT(MONTH FROM recorded_at)::int AS month, \
                    COUNT(*) AS observations, \
                    COUNT(*) FILTER (WHERE sale_price < price) AS discounted, \
                    COALESCE(SUM(discount_percent) FILTER (WHERE sale_price < price), 0)::bigint AS discount_sum \
             FROM price_history \
             WHERE ($1::bigint IS NULL OR product_source_id = $1) \
             GROUP BY 1 ORDER BY 1",
        )
        .persistent(false)
        .bind(product_source_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<MonthlySaleCounts> {
                let month: i32 = r.try_get("month")?;
                Ok(MonthlySaleCounts {
                    month: month as u32,
                    observations: r.try_get("observations")?,
                    discounted: r.try_get("discounted")?,
                    discount_sum: r.try_get("discount_sum")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn sale_summary(&self) -> Result<SaleSummary> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS active_sales, \
                    COALESCE(AVG(discount_percent), 0)::float8 AS average_discount \
             FROM product_sales WHERE is_active",
        )
        .persistent(false)
        .fetch_one(&self.pool)
        .await?;
        Ok(SaleSummary {
            active_sales: row.try_get("active_sales")?,
            average_discount: row.try_get("average_discount")?,
        })
    }
}
