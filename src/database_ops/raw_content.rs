use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;

use crate::catalog::{NewRawContent, RawContentRecord, RawContentRepo};
use crate::database_ops::db::Db;

const RAW_COLUMNS: &str = "id, source, source_product_id, content_hash, storage_ref, \
                           inline_content, fetched_at, processed_at";

fn raw_from_row(row: &PgRow) -> Result<RawContentRecord> {
    Ok(RawContentRecord {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        source_product_id: row.try_get("source_product_id")?,
        content_hash: row.try_get("content_hash")?,
        storage_ref: row.try_get("storage_ref")?,
        inline_content: row.try_get("inline_content")?,
        fetched_at: row.try_get("fetched_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl RawContentRepo for Db {
    #[instrument(skip(self))]
    async fn find_raw_by_hash(
        &self,
        source: &str,
        content_hash: &str,
    ) -> Result<Option<RawContentRecord>> {
        let sql = format!(
            "SELECT {RAW_COLUMNS} FROM raw_contents WHERE source = $1 AND content_hash = $2"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(source)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(raw_from_row).transpose()
    }

    #[instrument(skip(self, row), fields(source = %row.source, content_hash = %row.content_hash))]
    async fn insert_raw(&self, row: &NewRawContent) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO raw_contents \
                (source, source_product_id, content_hash, storage_ref, inline_content, fetched_at) \
             VALUES ($1,$2,$3,$4,$5,$6) \
             ON CONFLICT (source, content_hash) DO NOTHING \
             RETURNING id",
        )
        .persistent(false)
        .bind(&row.source)
        .bind(&row.source_product_id)
        .bind(&row.content_hash)
        .bind(row.storage_ref.as_deref())
        .bind(row.inline_content.as_deref())
        .bind(row.fetched_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn unprocessed_raw(&self, source: &str, limit: i64) -> Result<Vec<RawContentRecord>> {
        let sql = format!(
            "SELECT {RAW_COLUMNS} FROM raw_contents \
             WHERE source = $1 AND processed_at IS NULL \
             ORDER BY fetched_at, id LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(source)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(raw_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn mark_raw_processed(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let res = sqlx::query(
            "UPDATE raw_contents SET processed_at = $2 WHERE id = $1 AND processed_at IS NULL",
        )
        .persistent(false)
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() == 1)
    }
}
