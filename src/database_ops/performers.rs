use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use tracing::{info, instrument};

use crate::catalog::{Performer, PerformerName, PerformerRepo};
use crate::database_ops::db::Db;

#[async_trait]
impl PerformerRepo for Db {
    #[instrument(skip(self))]
    async fn performer_match_names(&self, min_chars: usize) -> Result<Vec<PerformerName>> {
        let rows = sqlx::query(
            "SELECT id AS performer_id, name FROM performers WHERE char_length(name) >= $1 \
             UNION ALL \
             SELECT performer_id, alias_name FROM performer_aliases WHERE char_length(alias_name) >= $1",
        )
        .persistent(false)
        .bind(min_chars as i32)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<PerformerName> {
                Ok(PerformerName {
                    performer_id: r.try_get(0)?,
                    name: r.try_get(1)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn find_performer_by_name(&self, name: &str) -> Result<Option<i64>> {
        Ok(sqlx::query_scalar("SELECT id FROM performers WHERE name = $1")
            .persistent(false)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    #[instrument(skip(self))]
    async fn find_performer_by_alias(&self, alias: &str) -> Result<Option<i64>> {
        Ok(
            sqlx::query_scalar("SELECT performer_id FROM performer_aliases WHERE alias_name = $1")
                .persistent(false)
                .bind(alias)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    #[instrument(skip(self))]
    async fn insert_performer(&self, name: &str, name_kana: Option<&str>) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO performers (name, name_kana) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET name_kana = COALESCE(performers.name_kana, EXCLUDED.name_kana) \
             RETURNING id",
        )
        .persistent(false)
        .bind(name)
        .bind(name_kana)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn add_performer_alias(&self, performer_id: i64, alias: &str) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO performer_aliases (performer_id, alias_name) VALUES ($1, $2) \
             ON CONFLICT (alias_name) DO NOTHING",
        )
        .persistent(false)
        .bind(performer_id)
        .bind(alias)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn link_product_performer(&self, product_id: i64, performer_id: i64) -> Result<bool> {
        let res = sqlx::query(
            "INSERT INTO product_performers (product_id, performer_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(product_id)
        .bind(performer_id)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn spaced_performers(&self, limit: i64) -> Result<Vec<Performer>> {
        let rows = sqlx::query(
            "SELECT id, name, name_kana FROM performers \
             WHERE name ~ '[[:space:]]' AND name !~ '[A-Za-z]' \
             ORDER BY id LIMIT $1",
        )
        .persistent(false)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<Performer> {
                Ok(Performer {
                    id: r.try_get("id")?,
                    name: r.try_get("name")?,
                    name_kana: r.try_get("name_kana")?,
                })
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn rename_performer(&self, performer_id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE performers SET name = $2 WHERE id = $1")
            .persistent(false)
            .bind(performer_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn merge_performer(&self, duplicate_id: i64, canonical_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let dup_name: Option<String> = sqlx::query_scalar("SELECT name FROM performers WHERE id = $1")
            .persistent(false)
            .bind(duplicate_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(dup_name) = dup_name else {
            tx.rollback().await?;
            return Ok(());
        };

        let moved = sqlx::query(
            "INSERT INTO product_performers (product_id, performer_id) \
             SELECT product_id, $2 FROM product_performers WHERE performer_id = $1 \
             ON CONFLICT DO NOTHING",
        )
        .persistent(false)
        .bind(duplicate_id)
        .bind(canonical_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        sqlx::query("DELETE FROM product_performers WHERE performer_id = $1")
            .persistent(false)
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE performer_aliases SET performer_id = $2 WHERE performer_id = $1")
            .persistent(false)
            .bind(duplicate_id)
            .bind(canonical_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM performers WHERE id = $1")
            .persistent(false)
            .bind(duplicate_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO performer_aliases (performer_id, alias_name) VALUES ($1, $2) \
             ON CONFLICT (alias_name) DO NOTHING",
        )
        .persistent(false)
        .bind(canonical_id)
        .bind(&dup_name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(duplicate_id, canonical_id, moved_links = moved, "merged performer");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn products_without_performers(&self, limit: i64) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            "SELECT p.id, p.title FROM products p \
             WHERE NOT EXISTS (SELECT 1 FROM product_performers pp WHERE pp.product_id = p.id) \
             ORDER BY p.id LIMIT $1",
        )
        .persistent(false)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| -> Result<(i64, String)> { Ok((r.try_get(0)?, r.try_get(1)?)) })
            .collect()
    }
}
