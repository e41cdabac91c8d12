#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use discourse_features::feature::FeatureKind;
use discourse_features::oracle::{CalibrationExample, OracleError, ScoringOracle};
use discourse_features::store::{FeatureTable, FeatureTableStore, RecordStore, StoreError};
use discourse_features::Record;
use serde_json::{json, Map, Value};

type Script = Box<dyn Fn(FeatureKind, &str) -> Result<Value, OracleError> + Send + Sync>;

/// Oracle driven by a closure over (feature, content), recording every call.
pub struct ScriptedOracle {
    script: Script,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
    example_counts: Mutex<Vec<usize>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl ScriptedOracle {
    pub fn new(
        script: impl Fn(FeatureKind, &str) -> Result<Value, OracleError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            example_counts: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    /// Answer every call with `{feature: value}`.
    pub fn constant(value: Value) -> Self {
        Self::new(move |feature, _| Ok(json!({ feature.name(): value.clone() })))
    }

    /// Raise `flag` once `calls` calls have completed.
    pub fn cancel_after(mut self, calls: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((calls, flag));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Record ids (the last token of each scored content) in call order.
    pub fn seen_ids(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    pub fn example_counts(&self) -> Vec<usize> {
        self.example_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScoringOracle for ScriptedOracle {
    async fn score(
        &self,
        feature: FeatureKind,
        content: &str,
        examples: &[CalibrationExample],
    ) -> Result<Value, OracleError> {
        self.seen.lock().unwrap().push(record_id_in(content).to_string());
        self.example_counts.lock().unwrap().push(examples.len());
        let result = (self.script)(feature, content);
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = &self.cancel_after {
            if n >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        result
    }
}

/// Corpus records carry their id as the last word of the comment body.
pub fn record_id_in(content: &str) -> &str {
    content.split_whitespace().last().unwrap_or("")
}

pub fn corpus(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| {
            let id = format!("r{i:03}");
            Record::new(
                id.clone(),
                format!("p{}", i % 3),
                Some(format!("thread {}", i % 3)),
                None,
                format!("comment {id}"),
            )
        })
        .collect()
}

/// Labeled row with a hand-written text block.
pub fn labeled_row(id: &str, feature: FeatureKind, label: Value) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("record_id".into(), Value::from(id));
    row.insert("text_content".into(), Value::from(format!("comment {id}")));
    row.insert(feature.name().into(), label);
    row
}

/// Store whose saves start failing after `ok_saves` successful ones.
pub struct FailingStore {
    pub inner: RecordStore,
    ok_saves: usize,
    saves: AtomicUsize,
}

impl FailingStore {
    pub fn new(inner: RecordStore, ok_saves: usize) -> Self {
        Self {
            inner,
            ok_saves,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_attempts(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl FeatureTableStore for FailingStore {
    fn load_table(&self, feature: FeatureKind) -> Result<Option<FeatureTable>, StoreError> {
        self.inner.load_table(feature)
    }

    fn save_table(&self, table: &FeatureTable) -> Result<(), StoreError> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst);
        if n >= self.ok_saves {
            return Err(StoreError::Write {
                path: self.inner.feature_path(table.feature),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.save_table(table)
    }
}
