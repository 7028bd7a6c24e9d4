use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{info, instrument};

use crate::catalog::{NewProduct, NewProductSource, Product, ProductRepo, ProductSource, SourceUpdate};
use crate::database_ops::db::Db;

const PRODUCT_COLUMNS: &str =
    "id, normalized_product_id, title, description, release_date, default_thumbnail_url";

fn product_from_row(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        normalized_product_id: row.try_get("normalized_product_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        release_date: row.try_get("release_date")?,
        default_thumbnail_url: row.try_get("default_thumbnail_url")?,
    })
}

fn source_from_row(row: &PgRow) -> Result<ProductSource> {
    Ok(ProductSource {
        id: row.try_get("id")?,
        asp_name: row.try_get("asp_name")?,
        original_product_id: row.try_get("original_product_id")?,
        product_id: row.try_get("product_id")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        is_subscription: row.try_get("is_subscription")?,
        affiliate_url: row.try_get("affiliate_url")?,
    })
}

#[async_trait]
impl ProductRepo for Db {
    #[instrument(skip(self))]
    async fn find_product_source(
        &self,
        asp_name: &str,
        original_product_id: &str,
    ) -> Result<Option<ProductSource>> {
        let row = sqlx::query(
            "SELECT id, asp_name, original_product_id, product_id, price, currency, \
                    is_subscription, affiliate_url \
             FROM product_sources WHERE asp_name = $1 AND original_product_id = $2",
        )
        .persistent(false)
        .bind(asp_name)
        .bind(original_product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    #[instrument(skip(self, update))]
    async fn update_product_source(&self, id: i64, update: &SourceUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE product_sources \
             SET price = COALESCE($2, price), \
                 affiliate_url = COALESCE($3, affiliate_url), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .persistent(false)
        .bind(id)
        .bind(update.price)
        .bind(update.affiliate_url.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_product_by_normalized_id(&self, normalized: &str) -> Result<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE normalized_product_id = $1");
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(normalized)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    #[instrument(skip(self, row))]
    async fn replace_product_details(&self, product_id: i64, row: &NewProduct) -> Result<()> {
        sqlx::query(
            "UPDATE products \
             SET title = $2, \
                 description = $3, \
                 release_date = COALESCE(release_date, $4), \
                 default_thumbnail_url = COALESCE(default_thumbnail_url, $5) \
             WHERE id = $1",
        )
        .persistent(false)
        .bind(product_id)
        .bind(&row.title)
        .bind(row.description.as_deref())
        .bind(row.release_date)
        .bind(row.default_thumbnail_url.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, row), fields(normalized = %row.normalized_product_id))]
    async fn insert_product(&self, row: &NewProduct) -> Result<i64> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO products \
                (normalized_product_id, title, description, release_date, default_thumbnail_url) \
             VALUES ($1,$2,$3,$4,$5) \
             ON CONFLICT (normalized_product_id) DO NOTHING \
             RETURNING id",
        )
        .persistent(false)
        .bind(&row.normalized_product_id)
        .bind(&row.title)
        .bind(row.description.as_deref())
        .bind(row.release_date)
        .bind(row.default_thumbnail_url.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok(id);
        }
        sqlx::query_scalar("SELECT id FROM products WHERE normalized_product_id = $1")
            .persistent(false)
            .bind(&row.normalized_product_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("product {} conflicted but not found", row.normalized_product_id))
    }

    #[instrument(skip(self, row), fields(asp = %row.asp_name, original_id = %row.original_product_id))]
    async fn insert_product_source(&self, row: &NewProductSource) -> Result<i64> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO product_sources \
                (product_id, asp_name, original_product_id, price, currency, is_subscription, affiliate_url) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) \
             ON CONFLICT (asp_name, original_product_id) DO NOTHING \
             RETURNING id",
        )
        .persistent(false)
        .bind(row.product_id)
        .bind(&row.asp_name)
        .bind(&row.original_product_id)
        .bind(row.price)
        .bind(&row.currency)
        .bind(row.is_subscription)
        .bind(row.affiliate_url.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(id) = inserted {
            return Ok(id);
        }
        sqlx::query_scalar(
            "SELECT id FROM product_sources WHERE asp_name = $1 AND original_product_id = $2",
        )
        .persistent(false)
        .bind(&row.asp_name)
        .bind(&row.original_product_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            anyhow!(
                "product source {}/{} conflicted but not found",
                row.asp_name,
                row.original_product_id
            )
        })
    }

    #[instrument(skip(self))]
    async fn link_product_tag(&self, product_id: i64, tag: &str) -> Result<bool> {
        // DO UPDATE (no-op) so RETURNING yields the id on conflict too.
        let tag_id: i64 = sqlx::query_scalar(
            "INSERT INTO tags (name) VALUES ($1) \
             ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
             RETURNING id",
        )
        .persistent(false)
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;
        let res = sqlx::query(
            "INSERT INTO product_tags (product_id, tag_id) VALUES ($1,$2) ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(product_id)
        .bind(tag_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn list_products(&self, after_id: i64, limit: i64) -> Result<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id > $1 ORDER BY id LIMIT $2");
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(product_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn delete_product_cascade(&self, product_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for stmt in [
            "DELETE FROM product_performers WHERE product_id = $1",
            "DELETE FROM product_tags WHERE product_id = $1",
            "DELETE FROM price_history WHERE product_source_id IN \
                (SELECT id FROM product_sources WHERE product_id = $1)",
            "DELETE FROM product_sales WHERE product_source_id IN \
                (SELECT id FROM product_sources WHERE product_id = $1)",
            "DELETE FROM product_sources WHERE product_id = $1",
            "DELETE FROM products WHERE id = $1",
        ] {
            sqlx::query(stmt)
                .persistent(false)
                .bind(product_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        info!(product_id, "deleted product and dependent rows");
        Ok(())
    }
}
