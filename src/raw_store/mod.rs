//! Content-addressed store for fetched pages and API payloads.
//!
//! Bytes go to object storage when it is configured and writable; otherwise
//! they are inlined into the `raw_contents` row. Either way one
//! (source, sha256) pair maps to exactly one row.
use std::sync::Arc;

use anyhow::{bail, Result};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::catalog::{NewRawContent, RawContentRecord, RawContentRepo};
use crate::error::FallbackReason;

pub mod object_storage;

pub use object_storage::{ObjectStorage, ObjectStoreBackend};

/// URL of an object written by [`ObjectStorage::save`].
pub type StorageRef = String;

#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub enabled: bool,
    pub url: Option<String>,
}

impl StorageConfig {
    pub fn disabled() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawPlacement {
    Stored(StorageRef),
    Inline(FallbackReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Inserted {
        record_id: i64,
        content_hash: String,
        placement: RawPlacement,
    },
    Duplicate {
        record_id: i64,
        content_hash: String,
    },
}

impl SaveOutcome {
    pub fn record_id(&self) -> i64 {
        match self {
            SaveOutcome::Inserted { record_id, .. } | SaveOutcome::Duplicate { record_id, .. } => {
                *record_id
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, SaveOutcome::Duplicate { .. })
    }
}

#[derive(Clone, Default)]
pub struct RawContentStore {
    storage: Option<Arc<dyn ObjectStorage>>,
}

impl RawContentStore {
    /// A backend that cannot be built is logged and treated as disabled.
    pub fn new(config: &StorageConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let Some(url) = config.url.as_deref() else {
            warn!("RAW_STORAGE_ENABLED set without RAW_STORAGE_URL; raw content will be inlined");
            return Self::disabled();
        };
        match ObjectStoreBackend::from_url(url) {
            Ok(backend) => Self::with_storage(Arc::new(backend)),
            Err(err) => {
                warn!(error = %err, "object storage unavailable; raw content will be inlined");
                Self::disabled()
            }
        }
    }

    pub fn with_storage(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage: Some(storage),
        }
    }

    pub fn disabled() -> Self {
        Self { storage: None }
    }

    pub fn storage_enabled(&self) -> bool {
        self.storage.is_some()
    }

    pub fn content_hash(content: &[u8]) -> String {
        format!("{:x}", Sha256::digest(content))
    }

    pub fn object_path(source: &str, content_hash: &str) -> String {
        let shard = content_hash.get(..2).unwrap_or(content_hash);
        format!("raw/{source}/{shard}/{content_hash}")
    }

    /// Attempts the object-storage write; the error side says why the caller
    /// has to inline instead.
    pub async fn store_bytes(
        &self,
        source: &str,
        content_hash: &str,
        content: &Bytes,
    ) -> Result<StorageRef, FallbackReason> {
        let storage = self.storage.as_ref().ok_or(FallbackReason::Disabled)?;
        storage
            .save(&Self::object_path(source, content_hash), content.clone())
            .await
            .map_err(|e| FallbackReason::WriteFailed(e.to_string()))
    }

    #[instrument(skip(self, repo, content), fields(bytes = content.len()))]
    pub async fn save_raw<R: RawContentRepo + ?Sized>(
        &self,
        repo: &R,
        source: &str,
        source_product_id: &str,
        content: Bytes,
    ) -> Result<SaveOutcome> {
        let content_hash = Self::content_hash(&content);
        if let Some(existing) = repo.find_raw_by_hash(source, &content_hash).await? {
            debug!(record_id = existing.id, %content_hash, "identical content already stored");
            return Ok(SaveOutcome::Duplicate {
                record_id: existing.id,
                content_hash,
            });
        }

        let placement = match self.store_bytes(source, &content_hash, &content).await {
            Ok(storage_ref) => RawPlacement::Stored(storage_ref),
            Err(reason) => {
                if reason != FallbackReason::Disabled {
                    warn!(%content_hash, %reason, "falling back to inline raw content");
                }
                RawPlacement::Inline(reason)
            }
        };
        let (storage_ref, inline_content) = match &placement {
            RawPlacement::Stored(r) => (Some(r.clone()), None),
            RawPlacement::Inline(_) => (None, Some(content.to_vec())),
        };
        let row = NewRawContent {
            source: source.to_string(),
            source_product_id: source_product_id.to_string(),
            content_hash: content_hash.clone(),
            storage_ref,
            inline_content,
            fetched_at: Utc::now(),
        };

        match repo.insert_raw(&row).await? {
            Some(record_id) => {
                info!(record_id, %content_hash, stored = matches!(placement, RawPlacement::Stored(_)), "raw content saved");
                Ok(SaveOutcome::Inserted {
                    record_id,
                    content_hash,
                    placement,
                })
            }
            // A concurrent writer won the unique index.
            None => match repo.find_raw_by_hash(source, &content_hash).await? {
                Some(existing) => Ok(SaveOutcome::Duplicate {
                    record_id: existing.id,
                    content_hash,
                }),
                None => bail!("raw insert for {source}/{content_hash} conflicted but no row found"),
            },
        }
    }

    /// Storage copy when a reference exists and is readable, else the inline copy.
    pub async fn get_raw(
        &self,
        storage_ref: Option<&str>,
        fallback_inline: Option<&[u8]>,
    ) -> Option<Bytes> {
        if let (Some(url), Some(storage)) = (storage_ref, self.storage.as_ref()) {
            match storage.download(url).await {
                Ok(bytes) => return Some(bytes),
                Err(err) => warn!(%url, error = %err, "raw content download failed"),
            }
        }
        fallback_inline.map(Bytes::copy_from_slice)
    }

    pub async fn load(&self, record: &RawContentRecord) -> Option<Bytes> {
        self.get_raw(record.storage_ref.as_deref(), record.inline_content.as_deref())
            .await
    }
}
