//! On-disk snapshots: the base corpus, per-feature tables and stage outputs.
//!
//! Every snapshot is a JSON document with a stable path under the data
//! directory. Writes go to a sibling temp file that is renamed over the
//! target, so readers only ever see a complete pre- or post-write state.
//!
//! Feature tables assume a single writer: two generation runs over the same
//! feature at once would race on the read-merge-write in a checkpoint flush.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::feature::{FeatureKind, FeatureValue};
use crate::record::{Record, RecordId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} does not exist")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed snapshot {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Snapshot I/O
// =============================================================================

/// Read a JSON snapshot; `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let raw = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
        path: path.to_path_buf(),
        source,
    })?;
    write_bytes_atomic(path, &raw)
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let write_err = |source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp_path = path.with_extension("tmp");
    if let Err(source) = write_then_rename(&tmp_path, path, bytes) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(source));
    }
    debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
    Ok(())
}

fn write_then_rename(tmp_path: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(tmp_path, path)
}

// =============================================================================
// Feature tables
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub record_id: RecordId,
    pub value: FeatureValue,
}

/// Scored values of one feature, at most one row per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub feature: FeatureKind,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(feature: FeatureKind) -> Self {
        Self {
            feature,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> HashSet<&str> {
        self.rows.iter().map(|r| r.record_id.as_str()).collect()
    }

    pub fn get(&self, record_id: &str) -> Option<&FeatureValue> {
        self.rows
            .iter()
            .find(|r| r.record_id == record_id)
            .map(|r| &r.value)
    }

    /// Append rows whose ids are not yet present. Returns how many were added.
    pub fn merge(&mut self, rows: impl IntoIterator<Item = FeatureRow>) -> usize {
        let mut seen: HashSet<RecordId> = self.rows.iter().map(|r| r.record_id.clone()).collect();
        let before = self.rows.len();
        for row in rows {
            if seen.insert(row.record_id.clone()) {
                self.rows.push(row);
            }
        }
        self.rows.len() - before
    }

    /// Repair values to the feature's type and drop repeated ids.
    fn normalize(self) -> Self {
        let value_type = self.feature.value_type();
        let total = self.rows.len();
        let mut table = FeatureTable::new(self.feature);
        table.merge(self.rows.into_iter().map(|row| FeatureRow {
            record_id: row.record_id,
            value: row.value.conform(value_type),
        }));
        if table.len() < total {
            warn!(
                feature = %table.feature,
                dropped = total - table.len(),
                "feature table held repeated record ids; kept first occurrence"
            );
        }
        table
    }
}

/// Persistence seam for feature tables.
pub trait FeatureTableStore: Send + Sync {
    fn load_table(&self, feature: FeatureKind) -> Result<Option<FeatureTable>, StoreError>;
    fn save_table(&self, table: &FeatureTable) -> Result<(), StoreError>;
}

// =============================================================================
// Record store
// =============================================================================

/// Stage snapshots rooted at the pipeline data directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_posts_path(&self) -> PathBuf {
        self.root.join("raw").join("posts.json")
    }

    pub fn raw_comments_path(&self) -> PathBuf {
        self.root.join("raw").join("comments.json")
    }

    pub fn records_path(&self) -> PathBuf {
        self.root.join("processed").join("records.json")
    }

    pub fn feature_path(&self, feature: FeatureKind) -> PathBuf {
        self.root
            .join("features")
            .join(format!("{}.json", feature.name()))
    }

    pub fn train_sample_path(&self) -> PathBuf {
        self.root.join("labeled").join("train_sample.json")
    }

    pub fn val_sample_path(&self) -> PathBuf {
        self.root.join("labeled").join("val_sample.json")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn verdicts_path(&self) -> PathBuf {
        self.reports_dir().join("verdicts.json")
    }

    pub fn assembled_path(&self) -> PathBuf {
        self.root.join("assembled").join("dataset.json")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join("cache").join("scores.sqlite")
    }

    /// The base corpus. Missing is an error: every later stage needs it.
    pub fn read_records(&self) -> Result<Vec<Record>, StoreError> {
        let path = self.records_path();
        let mut records: Vec<Record> =
            read_json(&path)?.ok_or_else(|| StoreError::Missing(path.clone()))?;
        for record in &mut records {
            record.refresh_text_content();
        }
        Ok(records)
    }

    pub fn write_records(&self, records: &[Record]) -> Result<(), StoreError> {
        write_json_atomic(&self.records_path(), records)
    }
}

impl FeatureTableStore for RecordStore {
    fn load_table(&self, feature: FeatureKind) -> Result<Option<FeatureTable>, StoreError> {
        let table: Option<FeatureTable> = read_json(&self.feature_path(feature))?;
        Ok(table.map(FeatureTable::normalize))
    }

    fn save_table(&self, table: &FeatureTable) -> Result<(), StoreError> {
        write_json_atomic(&self.feature_path(table.feature), table)
    }
}
