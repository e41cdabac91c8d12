mod common;

use std::collections::HashMap;

use common::{labeled_row, record_id_in, ScriptedOracle};
use discourse_features::feature::{FeatureDescriptor, FeatureKind};
use discourse_features::labeled::LabeledSample;
use discourse_features::metrics::MetricKind;
use discourse_features::oracle::OracleError;
use discourse_features::validation::{validate, ValidationReport, Verdict, VerdictBook};
use serde_json::{json, Value};
use tempfile::tempdir;

fn sample(feature: FeatureKind, labels: &[(&str, Value)]) -> LabeledSample {
    LabeledSample::from_rows(
        labels
            .iter()
            .map(|(id, v)| labeled_row(id, feature, v.clone()))
            .collect(),
    )
}

/// Oracle answering from a fixed id -> value table.
fn lookup(answers: &[(&str, Value)]) -> ScriptedOracle {
    let answers: HashMap<String, Value> = answers
        .iter()
        .map(|(id, v)| (id.to_string(), v.clone()))
        .collect();
    ScriptedOracle::new(move |feature, content| match answers.get(record_id_in(content)) {
        Some(v) => Ok(json!({ feature.name(): v.clone() })),
        None => Err(OracleError::Unavailable("no scripted answer".into())),
    })
}

#[tokio::test]
async fn ordinal_feature_passes_on_adjacent_accuracy() {
    let kind = FeatureKind::PoliticalStance;
    let train = sample(kind, &[("t1", json!(1)), ("t2", json!(5))]);
    let validation = sample(
        kind,
        &[
            ("v1", json!(1)),
            ("v2", json!(2)),
            ("v3", json!(3)),
            ("v4", json!(4)),
            ("v5", json!(5)),
        ],
    );
    let oracle = lookup(&[
        ("v1", json!(1)),
        ("v2", json!(3)),
        ("v3", json!(3)),
        ("v4", json!(5)),
        ("v5", json!(5)),
    ]);
    let descriptor = FeatureDescriptor::new(kind, 0.9, None);
    let mut report = ValidationReport::new();

    let outcome = validate(&descriptor, &train, &validation, &oracle, &mut report).await;
    assert_eq!(outcome.metric, MetricKind::AdjacentAccuracy);
    assert_eq!(outcome.metric_value, Some(1.0));
    assert_eq!(outcome.verdict, Verdict::Passed);
    assert_eq!(outcome.secondary.get("exact_accuracy"), Some(&0.6));
    assert_eq!(oracle.example_counts(), vec![2; 5]);
    assert!(outcome.confusion.is_some());
}

#[tokio::test]
async fn out_of_range_ordinal_answers_fail_without_aborting_the_run() {
    let kind = FeatureKind::PoliticalStance;
    let train = sample(kind, &[("t1", json!(2))]);
    let validation = sample(kind, &[("v1", json!(1)), ("v2", json!(3)), ("v3", json!(4))]);
    let oracle = lookup(&[
        ("v1", json!(-1e300)),
        ("v2", json!(i64::MIN)),
        ("v3", json!(4)),
    ]);
    let descriptor = FeatureDescriptor::new(kind, 0.9, None);
    let mut report = ValidationReport::new();

    let outcome = validate(&descriptor, &train, &validation, &oracle, &mut report).await;
    assert_eq!(oracle.calls(), 3);
    assert_eq!(outcome.metric_value, Some(1.0 / 3.0));
    assert_eq!(outcome.verdict, Verdict::Failed);
}

#[tokio::test]
async fn continuous_feature_passes_only_when_error_is_low() {
    let kind = FeatureKind::Sentiment;
    let train = sample(kind, &[("t1", json!(0.5))]);
    let validation = sample(kind, &[("v1", json!(0.2)), ("v2", json!(-0.4))]);
    let descriptor = FeatureDescriptor::new(kind, 0.25, None);

    let close = lookup(&[("v1", json!(0.3)), ("v2", json!(-0.5))]);
    let outcome = validate(&descriptor, &train, &validation, &close, &mut ValidationReport::new()).await;
    assert_eq!(outcome.metric, MetricKind::MeanAbsoluteError);
    assert!(outcome.passed());

    let far = lookup(&[("v1", json!(-0.8)), ("v2", json!(0.6))]);
    let outcome = validate(&descriptor, &train, &validation, &far, &mut ValidationReport::new()).await;
    assert_eq!(outcome.verdict, Verdict::Failed);
    assert_eq!(outcome.secondary.get("polarity_agreement"), Some(&0.0));
}

#[tokio::test]
async fn categorical_feature_uses_exact_accuracy() {
    let kind = FeatureKind::DiscourseTone;
    let train = sample(kind, &[("t1", json!("civil"))]);
    let validation = sample(
        kind,
        &[("v1", json!("civil")), ("v2", json!("hostile")), ("v3", json!("sarcastic"))],
    );
    let oracle = lookup(&[("v1", json!("civil")), ("v2", json!("hostile")), ("v3", json!("civil"))]);
    let descriptor = FeatureDescriptor::new(kind, 0.8, None);

    let outcome = validate(&descriptor, &train, &validation, &oracle, &mut ValidationReport::new()).await;
    assert_eq!(outcome.metric, MetricKind::ExactAccuracy);
    let value = outcome.metric_value.unwrap();
    assert!((value - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(outcome.verdict, Verdict::Failed);
}

#[tokio::test]
async fn missing_labels_skip_without_calling_the_oracle() {
    let kind = FeatureKind::DominantFrame;
    let train = sample(kind, &[("t1", Value::Null)]);
    let validation = sample(kind, &[("v1", json!("legal"))]);
    let oracle = ScriptedOracle::constant(json!("legal"));
    let descriptor = FeatureDescriptor::new(kind, 0.8, None);
    let mut report = ValidationReport::new();

    let outcome = validate(&descriptor, &train, &validation, &oracle, &mut report).await;
    assert!(matches!(outcome.verdict, Verdict::Skipped { .. }));
    assert_eq!(outcome.metric_value, None);
    assert_eq!(oracle.calls(), 0);
    assert!(report.lines().iter().any(|l| l.contains("SKIPPED")));
}

#[tokio::test]
async fn one_failed_call_becomes_a_sentinel_prediction() {
    let kind = FeatureKind::ArgumentQuality;
    let train = sample(kind, &[("t1", json!(3))]);
    let validation = sample(kind, &[("v1", json!(4)), ("v2", json!(2)), ("v3", json!(5))]);
    // v3 has no scripted answer and fails.
    let oracle = lookup(&[("v1", json!(4)), ("v2", json!(2))]);
    let descriptor = FeatureDescriptor::new(kind, 0.9, None);

    let outcome = validate(&descriptor, &train, &validation, &oracle, &mut ValidationReport::new()).await;
    assert_eq!(oracle.calls(), 3);
    assert_eq!(outcome.failures, 1);
    let value = outcome.metric_value.unwrap();
    assert!((value - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(outcome.verdict, Verdict::Failed);
}

#[tokio::test]
async fn verdicts_persist_and_latest_result_wins() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reports").join("verdicts.json");
    let kind = FeatureKind::PoliticalStance;
    let descriptor = FeatureDescriptor::new(kind, 0.9, None);
    let train = sample(kind, &[("t1", json!(2))]);
    let validation = sample(kind, &[("v1", json!(2))]);

    let pass = lookup(&[("v1", json!(2))]);
    let outcome = validate(&descriptor, &train, &validation, &pass, &mut ValidationReport::new()).await;
    let mut book = VerdictBook::load(&path).unwrap();
    book.record(&outcome);
    book.save(&path).unwrap();
    assert!(VerdictBook::load(&path).unwrap().is_passed(kind));

    let empty = sample(kind, &[]);
    let skipped = validate(&descriptor, &train, &empty, &pass, &mut ValidationReport::new()).await;
    let mut book = VerdictBook::load(&path).unwrap();
    book.record(&skipped);
    book.save(&path).unwrap();
    let reloaded = VerdictBook::load(&path).unwrap();
    assert!(!reloaded.is_passed(kind));
    assert!(matches!(
        reloaded.get(kind).map(|r| &r.verdict),
        Some(Verdict::Skipped { .. })
    ));
}

#[test]
fn report_saves_every_logged_line() {
    let dir = tempdir().unwrap();
    let mut report = ValidationReport::new();
    report.log("first line");
    report.log("second line");
    let name = report.file_name();
    let path = report.save(&dir.path().join("reports")).unwrap();

    assert_eq!(path.file_name().unwrap().to_str().unwrap(), name);
    assert!(name.starts_with("validation_report_"));
    let body = std::fs::read_to_string(&path).unwrap();
    assert!(body.contains("first line"));
    assert!(body.contains("second line"));
}
