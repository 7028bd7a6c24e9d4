//! Process configuration gathered from the environment plus the per-source
//! JSON file (URL templates, id rules, field extraction rules).
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::fetch::RetryOptions;
use crate::normalization::product_id::IdRule;
use crate::parsers::configured::FieldRules;
use crate::raw_store::StorageConfig;
use crate::util::env::{env_flag, env_opt, env_parse};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retry: RetryOptions,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Politeness gap between consecutive requests to the same source.
    pub request_delay: Duration,
    pub storage: StorageConfig,
    pub db_max_connections: u32,
    pub sources_path: String,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let retry = RetryOptions {
            max_retries: env_parse("FETCH_MAX_RETRIES", 3u32),
            initial_delay: Duration::from_millis(env_parse("FETCH_INITIAL_DELAY_MS", 500u64)),
            max_delay: Duration::from_millis(env_parse("FETCH_MAX_DELAY_MS", 10_000u64)),
        };
        let storage = StorageConfig {
            enabled: env_flag("RAW_STORAGE_ENABLED", env_opt("RAW_STORAGE_URL").is_some()),
            url: env_opt("RAW_STORAGE_URL"),
        };
        Self {
            retry,
            request_timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECS", 30u64)),
            connect_timeout: Duration::from_secs(env_parse("FETCH_CONNECT_TIMEOUT_SECS", 10u64)),
            request_delay: Duration::from_millis(env_parse("REQUEST_DELAY_MS", 1_500u64)),
            storage,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 5u32),
            sources_path: env_opt("SOURCES_CONFIG")
                .unwrap_or_else(|| "./config/sources.json".to_string()),
        }
    }

    pub fn load_sources(&self) -> Result<SourcesConfig> {
        SourcesConfig::from_file(&self.sources_path)
    }
}

/// Per-source crawl and parse settings, keyed by ASP name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    #[serde(flatten)]
    pub sources: HashMap<String, SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Detail page/API URL; `{id}` is replaced with the source-native id.
    pub detail_url_template: String,
    #[serde(default)]
    pub id_rule: IdRule,
    pub fields: FieldRules,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub is_subscription: bool,
}

fn default_currency() -> String {
    "JPY".to_string()
}

impl SourceConfig {
    pub fn detail_url(&self, source_product_id: &str) -> String {
        self.detail_url_template
            .replace("{id}", &urlencoding::encode(source_product_id))
    }
}

impl SourcesConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading sources config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("parsing sources config {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn get(&self, source: &str) -> Option<&SourceConfig> {
        self.sources.get(source)
    }

    pub fn id_rule(&self, source: &str) -> IdRule {
        self.get(source)
            .map(|s| s.id_rule.clone())
            .unwrap_or_default()
    }
}
