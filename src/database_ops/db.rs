use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use tracing::{info, instrument, warn};

use crate::util::env::env_flag;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    /// Connects and, when `AUTO_MIGRATE` is on, applies pending migrations.
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect_no_migrate(database_url, max_connections).await?;
        if env_flag("AUTO_MIGRATE", false) {
            info!("running migrations (AUTO_MIGRATE=on)");
            run_migrations(&db.pool, Path::new("./migrations")).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping migrations");
        }
        Ok(db)
    }

    #[instrument(skip(database_url))]
    pub async fn connect_no_migrate(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }
        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("failed to connect to database")?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }
}

/// A numbered `.sql` file: `0001_catalog.sql` is version 1, description "catalog".
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFile {
    pub version: i64,
    pub description: String,
    pub path: PathBuf,
}

/// Files without a numeric prefix (notes, settings dumps) are ignored.
pub fn migration_candidates(dir: &Path) -> Result<Vec<MigrationFile>> {
    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(stem) = fname.strip_suffix(".sql") else {
            continue;
        };
        let digits: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
        let Some(rest) = stem[digits.len()..].strip_prefix('_') else {
            continue;
        };
        if let Ok(version) = digits.parse::<i64>() {
            candidates.push(MigrationFile {
                version,
                description: rest.to_string(),
                path: path.clone(),
            });
        }
    }
    candidates.sort_by_key(|m| m.version);
    Ok(candidates)
}

/// Splits a migration into the part that can run as one batch and the
/// `CREATE INDEX CONCURRENTLY` statements that must run on their own.
pub fn split_concurrent_indexes(sql: &str) -> (String, Vec<String>) {
    let mut transactional = String::with_capacity(sql.len());
    let mut concurrent_indexes: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut capturing = false;
    for line in sql.lines() {
        let lt = line.trim_start().to_lowercase();
        if !capturing
            && (lt.starts_with("create index concurrently")
                || lt.starts_with("create unique index concurrently"))
        {
            capturing = true;
            buf.clear();
        }
        if capturing {
            buf.push_str(line);
            buf.push('\n');
            if line.contains(';') {
                capturing = false;
                concurrent_indexes.push(buf.trim().to_string());
            }
            continue;
        }
        transactional.push_str(line);
        transactional.push('\n');
    }
    (transactional, concurrent_indexes)
}

/// The same statement without `CONCURRENTLY`.
pub fn blocking_form(stmt: &str) -> String {
    let lower = stmt.to_lowercase();
    match lower.find(" concurrently") {
        Some(pos) => format!("{}{}", &stmt[..pos], &stmt[pos + " concurrently".len()..]),
        None => stmt.to_string(),
    }
}

/// Two-phase runner tracked in `_sqlx_migrations`: each file's plain statements
/// run first, then its concurrent index builds one by one outside any
/// transaction. A concurrent build that Postgres refuses is retried blocking.
pub async fn run_migrations(pool: &PgPool, dir: &Path) -> Result<usize> {
    if !dir.exists() {
        warn!(?dir, "migrations directory not found");
        return Ok(0);
    }
    // raw_sql avoids prepared statements under PgBouncer
    sqlx::raw_sql(
        "CREATE TABLE IF NOT EXISTS _sqlx_migrations (
            version BIGINT PRIMARY KEY,
            description TEXT,
            installed_at TIMESTAMPTZ DEFAULT now()
         )",
    )
    .execute(pool)
    .await?;
    let mut applied: HashSet<i64> = HashSet::new();
    for r in sqlx::raw_sql("SELECT version FROM _sqlx_migrations")
        .fetch_all(pool)
        .await?
    {
        applied.insert(r.try_get::<i64, _>(0)?);
    }

    let mut count = 0;
    for migration in migration_candidates(dir)? {
        if applied.contains(&migration.version) {
            continue;
        }
        let sql = std::fs::read_to_string(&migration.path)?;
        info!(version = migration.version, file = ?migration.path, "applying migration (two-phase)");

        let (transactional, concurrent_indexes) = split_concurrent_indexes(&sql);
        let trimmed = transactional.trim();
        if !trimmed.is_empty() {
            sqlx::raw_sql(trimmed)
                .execute(pool)
                .await
                .with_context(|| format!("migration {} failed", migration.version))?;
        }
        for stmt in concurrent_indexes {
            info!(migration_version = migration.version, index_stmt = %stmt, "creating concurrent index");
            if let Err(e) = sqlx::raw_sql(&stmt).execute(pool).await {
                warn!(migration_version = migration.version, error = %e, "concurrent index creation failed; retrying blocking");
                sqlx::raw_sql(&blocking_form(&stmt))
                    .execute(pool)
                    .await
                    .with_context(|| format!("index build in migration {} failed", migration.version))?;
            }
        }

        let insert_stmt = format!(
            "INSERT INTO _sqlx_migrations(version, description) VALUES ({}, '{}')",
            migration.version,
            migration.description.replace('\'', "''")
        );
        sqlx::raw_sql(&insert_stmt).execute(pool).await?;
        applied.insert(migration.version);
        count += 1;
    }
    info!(applied = count, "migrations up-to-date");
    Ok(count)
}
