//! Run-record storage boundary. The core only appends and lists opaque
//! summaries; sled keeps them on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Backend(String),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Summary of one completed simulation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub interface: String,
    pub device_count: usize,
    pub duration_secs: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub started_at: DateTime<Utc>,
}

/// Append-only run history.
pub trait RunStore: Send + Sync {
    fn append(&self, record: &RunRecord) -> Result<(), StoreError>;
    /// Most recent records, newest first.
    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError>;
}

pub struct SledRunStore {
    tree: sled::Db,
}

impl SledRunStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let tree = sled::open(dir.join("runs")).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { tree })
    }
}

impl RunStore for SledRunStore {
    fn append(&self, record: &RunRecord) -> Result<(), StoreError> {
        // Key by start time; the sled-generated id breaks same-second ties
        let id = self.tree.generate_id().map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut key = record.started_at.timestamp().to_be_bytes().to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        let value = serde_json::to_vec(record)?;
        self.tree
            .insert(key, value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.tree.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        let mut out = Vec::with_capacity(limit);
        for item in self.tree.iter().rev().take(limit) {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            match serde_json::from_slice(&value) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!("undecodable run record skipped: {e}"),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset_secs: i64) -> RunRecord {
        RunRecord {
            interface: "eth0".into(),
            device_count: 3,
            duration_secs: 60,
            packets_sent: 100,
            packets_received: 250,
            started_at: Utc::now() - chrono::Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn test_append_and_recent_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledRunStore::open(dir.path()).unwrap();

        store.append(&record(300)).unwrap();
        store.append(&record(200)).unwrap();
        store.append(&record(100)).unwrap();

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].started_at >= recent[1].started_at);
    }

    #[test]
    fn test_recent_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledRunStore::open(dir.path()).unwrap();
        assert!(store.recent(20).unwrap().is_empty());
    }
}
