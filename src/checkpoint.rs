//! Buffered, resumable persistence for one feature table.

use std::collections::HashSet;

use tracing::info;

use crate::feature::FeatureKind;
use crate::record::RecordId;
use crate::store::{FeatureRow, FeatureTable, FeatureTableStore, StoreError};

/// Rows accumulate in memory and reach disk only through [`flush`], which
/// merges them into the stored table and atomically replaces it. Dropping a
/// checkpoint with pending rows loses exactly those rows.
///
/// [`flush`]: FeatureCheckpoint::flush
pub struct FeatureCheckpoint<'a, S: FeatureTableStore + ?Sized> {
    store: &'a S,
    feature: FeatureKind,
    buffer: Vec<FeatureRow>,
    flushes: usize,
}

impl<'a, S: FeatureTableStore + ?Sized> FeatureCheckpoint<'a, S> {
    pub fn new(store: &'a S, feature: FeatureKind) -> Self {
        Self {
            store,
            feature,
            buffer: Vec::new(),
            flushes: 0,
        }
    }

    /// Ids already persisted for this feature.
    pub fn load(&self) -> Result<HashSet<RecordId>, StoreError> {
        Ok(self
            .store
            .load_table(self.feature)?
            .map(|table| table.rows.into_iter().map(|r| r.record_id).collect())
            .unwrap_or_default())
    }

    pub fn append(&mut self, row: FeatureRow) {
        self.buffer.push(row);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Merge the buffer into the stored table and persist it.
    ///
    /// The buffer is cleared only after the write succeeds. Returns the number
    /// of rows newly added to the table.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let mut table = self
            .store
            .load_table(self.feature)?
            .unwrap_or_else(|| FeatureTable::new(self.feature));
        let added = table.merge(self.buffer.iter().cloned());
        self.store.save_table(&table)?;

        self.flushes += 1;
        info!(
            feature = %self.feature,
            buffered = self.buffer.len(),
            added,
            total = table.len(),
            "checkpoint flushed"
        );
        self.buffer.clear();
        Ok(added)
    }

    /// Drop unflushed rows, returning how many were lost.
    pub fn discard(mut self) -> usize {
        let lost = self.buffer.len();
        self.buffer.clear();
        lost
    }
}
