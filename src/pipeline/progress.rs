//! Progress checkpoint for resuming an interrupted run.
//!
//! A single JSON record, overwritten after every chunk. Unreadable records
//! are treated as absent.

use crate::io::open_location;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// Last completed chunk and cumulative counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub chunk_num: usize,
    pub total_chunks: usize,
    pub completed_records: usize,
    pub failed_records: usize,
}

/// RFC 3339, or an ISO-8601 local timestamp without offset read as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

impl std::fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunk {}/{} completed at {} ({} succeeded, {} failed)",
            self.chunk_num,
            self.total_chunks,
            self.timestamp.to_rfc3339(),
            self.completed_records,
            self.failed_records
        )
    }
}

pub struct ProgressStore {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn ObjectStore>, path: ObjectPath) -> Self {
        Self { store, path }
    }

    /// Open the checkpoint at a local path or `s3://bucket/key`.
    pub fn open(location: &str) -> Result<Self> {
        let (store, path) = open_location(location)?;
        Ok(Self::new(store, path))
    }

    /// Overwrite the record.
    pub async fn save(
        &self,
        chunk_num: usize,
        total_chunks: usize,
        completed_records: usize,
        failed_records: usize,
    ) -> Result<ProgressRecord> {
        let record = ProgressRecord {
            timestamp: Utc::now(),
            chunk_num,
            total_chunks,
            completed_records,
            failed_records,
        };

        let json = serde_json::to_vec_pretty(&record)?;
        self.store
            .put(&self.path, PutPayload::from(json))
            .await
            .with_context(|| format!("Failed to write progress to {}", self.path))?;

        tracing::debug!("Progress saved: {}", record);
        Ok(record)
    }

    /// The current record, or `None` when missing or unreadable.
    pub async fn load(&self) -> Option<ProgressRecord> {
        let bytes = match self.store.get(&self.path).await {
            Ok(result) => match result.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Failed to read progress {}: {}", self.path, e);
                    return None;
                }
            },
            Err(object_store::Error::NotFound { .. }) => return None,
            Err(e) => {
                tracing::warn!("Failed to read progress {}: {}", self.path, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring unreadable progress {}: {}", self.path, e);
                None
            }
        }
    }

    /// Remove the record. Clearing an absent record succeeds.
    pub async fn clear(&self) -> Result<()> {
        match self.store.delete(&self.path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to clear progress {}", self.path)),
        }
    }
}
