mod common;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{corpus, labeled_row, FailingStore, ScriptedOracle};
use discourse_features::feature::{FeatureDescriptor, FeatureKind, FeatureValue};
use discourse_features::generation::{generate, GenerateOptions, GenerationError, PilotConfig};
use discourse_features::labeled::LabeledSample;
use discourse_features::oracle::OracleError;
use discourse_features::store::{FeatureTableStore, RecordStore};
use serde_json::{json, Value};
use tempfile::tempdir;

fn stance() -> FeatureDescriptor {
    FeatureDescriptor::new(FeatureKind::PoliticalStance, 0.9, None)
}

fn options(batch_size: usize) -> GenerateOptions {
    GenerateOptions {
        batch_size,
        pilot: None,
    }
}

fn stored_ids(store: &RecordStore) -> HashSet<String> {
    store
        .load_table(FeatureKind::PoliticalStance)
        .unwrap()
        .map(|t| t.rows.into_iter().map(|r| r.record_id).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn rerun_after_completion_is_a_no_op() {
    let dir = tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    let records = corpus(10);
    let oracle = ScriptedOracle::constant(json!(3));
    let train = LabeledSample::default();

    let first = generate(&stance(), &records, &train, &store, &options(3), &oracle, None)
        .await
        .unwrap();
    assert_eq!(first.queued, 10);
    assert_eq!(first.processed, 10);
    assert_eq!(first.flushes, 4);
    assert_eq!(stored_ids(&store).len(), 10);
    let table_before = store.load_table(FeatureKind::PoliticalStance).unwrap();

    let second = generate(&stance(), &records, &train, &store, &options(3), &oracle, None)
        .await
        .unwrap();
    assert_eq!(second.already_processed, 10);
    assert_eq!(second.queued, 0);
    assert_eq!(second.flushes, 0);
    assert_eq!(oracle.calls(), 10);
    assert_eq!(store.load_table(FeatureKind::PoliticalStance).unwrap(), table_before);
}

#[tokio::test]
async fn cancellation_keeps_flushed_batches_and_resume_finishes_the_rest() {
    let dir = tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    let records = corpus(10);
    let train = LabeledSample::default();

    let flag = Arc::new(AtomicBool::new(false));
    let oracle = ScriptedOracle::constant(json!(2)).cancel_after(6, flag.clone());
    let interrupted = generate(
        &stance(),
        &records,
        &train,
        &store,
        &options(4),
        &oracle,
        Some(flag.as_ref()),
    )
    .await
    .unwrap();
    assert!(interrupted.cancelled);
    assert_eq!(interrupted.processed, 6);
    assert_eq!(interrupted.flushes, 1);
    assert_eq!(interrupted.discarded, 2);

    let persisted = stored_ids(&store);
    assert_eq!(persisted.len(), 4);

    let resumed_oracle = ScriptedOracle::constant(json!(2));
    let resumed = generate(&stance(), &records, &train, &store, &options(4), &resumed_oracle, None)
        .await
        .unwrap();
    assert_eq!(resumed.already_processed, 4);
    assert_eq!(resumed.queued, 6);
    assert!(resumed_oracle
        .seen_ids()
        .iter()
        .all(|id| !persisted.contains(id)));

    let all: HashSet<String> = records.iter().map(|r| r.record_id.clone()).collect();
    assert_eq!(stored_ids(&store), all);
}

#[tokio::test]
async fn pilot_then_full_run_never_rescores_pilot_records() {
    let dir = tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    let records = corpus(12);
    let train = LabeledSample::default();

    let pilot = GenerateOptions {
        batch_size: 25,
        pilot: Some(PilotConfig { size: 4, seed: 42 }),
    };
    let pilot_oracle = ScriptedOracle::constant(json!(1));
    let summary = generate(&stance(), &records, &train, &store, &pilot, &pilot_oracle, None)
        .await
        .unwrap();
    assert_eq!(summary.processed, 4);
    let pilot_ids = stored_ids(&store);
    assert_eq!(pilot_ids.len(), 4);

    let full_oracle = ScriptedOracle::constant(json!(1));
    let full = generate(&stance(), &records, &train, &store, &options(25), &full_oracle, None)
        .await
        .unwrap();
    assert_eq!(full.queued, 8);
    assert!(full_oracle.seen_ids().iter().all(|id| !pilot_ids.contains(id)));
    assert_eq!(stored_ids(&store).len(), 12);
}

#[tokio::test]
async fn failed_checkpoint_write_is_fatal_and_keeps_prior_state() {
    let dir = tempdir().unwrap();
    let store = FailingStore::new(RecordStore::new(dir.path()), 1);
    let records = corpus(6);
    let oracle = ScriptedOracle::constant(json!(4));

    let err = generate(
        &stance(),
        &records,
        &LabeledSample::default(),
        &store,
        &options(2),
        &oracle,
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GenerationError::Store(_)));
    assert_eq!(store.save_attempts(), 2);
    assert_eq!(oracle.calls(), 4);
    assert_eq!(stored_ids(&store.inner).len(), 2);
}

#[tokio::test]
async fn oracle_failures_are_stored_as_sentinels_and_not_retried() {
    let dir = tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    let records = corpus(4);
    let oracle = ScriptedOracle::new(|feature, content| match common::record_id_in(content) {
        "r001" => Err(OracleError::Unavailable("timeout".into())),
        "r002" => Ok(json!({ "unrelated": 3 })),
        "r003" => Ok(json!({ feature.name(): Value::Null })),
        _ => Ok(json!({ feature.name(): "5" })),
    });

    let summary = generate(
        &stance(),
        &records,
        &LabeledSample::default(),
        &store,
        &options(10),
        &oracle,
        None,
    )
    .await
    .unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failures, 3);

    let table = store.load_table(FeatureKind::PoliticalStance).unwrap().unwrap();
    assert_eq!(table.get("r000"), Some(&FeatureValue::Ordinal(5)));
    for id in ["r001", "r002", "r003"] {
        assert_eq!(table.get(id), Some(&FeatureValue::Ordinal(-1)));
    }

    let again = generate(
        &stance(),
        &records,
        &LabeledSample::default(),
        &store,
        &options(10),
        &oracle,
        None,
    )
    .await
    .unwrap();
    assert_eq!(again.queued, 0);
    assert_eq!(oracle.calls(), 4);
}

#[tokio::test]
async fn empty_queue_writes_nothing() {
    let dir = tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    let oracle = ScriptedOracle::constant(json!(1));

    let summary = generate(
        &stance(),
        &[],
        &LabeledSample::default(),
        &store,
        &options(5),
        &oracle,
        None,
    )
    .await
    .unwrap();
    assert_eq!(summary.queued, 0);
    assert_eq!(summary.flushes, 0);
    assert_eq!(oracle.calls(), 0);
    assert!(store.load_table(FeatureKind::PoliticalStance).unwrap().is_none());
}

#[tokio::test]
async fn calibration_examples_come_from_labeled_train_rows() {
    let dir = tempdir().unwrap();
    let store = RecordStore::new(dir.path());
    let records = corpus(3);
    let train = LabeledSample::from_rows(vec![
        labeled_row("t1", FeatureKind::PoliticalStance, json!(1)),
        labeled_row("t2", FeatureKind::PoliticalStance, json!(5)),
        labeled_row("t3", FeatureKind::PoliticalStance, Value::Null),
        labeled_row("t4", FeatureKind::DiscourseTone, json!("civil")),
    ]);
    let oracle = ScriptedOracle::constant(json!(3));

    generate(&stance(), &records, &train, &store, &options(10), &oracle, None)
        .await
        .unwrap();
    assert_eq!(oracle.example_counts(), vec![2, 2, 2]);
}
