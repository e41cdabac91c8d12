//! Calibration validation of the scoring oracle against human labels.
//!
//! The train split supplies few-shot examples, the validation split is scored
//! blind, and the feature's agreement metric decides the verdict. Nothing is
//! persisted here except through [`ValidationReport::save`] and
//! [`VerdictBook::save`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::feature::{FeatureDescriptor, FeatureKind, FeatureValue, ValueType, ORDINAL_SENTINEL};
use crate::labeled::LabeledSample;
use crate::metrics::{
    adjacent_accuracy, binary_accuracy, exact_accuracy, mean_absolute_error, polarity_agreement,
    ConfusionMatrix, MetricKind,
};
use crate::oracle::{score_record, CalibrationExample, ScoringOracle};
use crate::store::{read_json, write_bytes_atomic, write_json_atomic, StoreError};

/// Tolerance for ordinal adjacent accuracy.
pub const ADJACENT_TOLERANCE: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("failed to persist validation output: {0}")]
    Persist(#[from] StoreError),
}

// =============================================================================
// Report
// =============================================================================

/// Append-only log of one validation run. Saved once, then gone.
#[derive(Debug)]
pub struct ValidationReport {
    started: DateTime<Local>,
    lines: Vec<String>,
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            started: Local::now(),
            lines: Vec::new(),
        }
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "validation_report", "{line}");
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn file_name(&self) -> String {
        format!(
            "validation_report_{}.txt",
            self.started.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the report under `dir` and return its path.
    pub fn save(self, dir: &Path) -> Result<PathBuf, StoreError> {
        let path = dir.join(self.file_name());
        let mut body = self.lines.join("\n");
        body.push('\n');
        write_bytes_atomic(&path, body.as_bytes())?;
        Ok(path)
    }
}

// =============================================================================
// Verdicts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    /// Not enough labeled data; the feature counts as not yet validated.
    Skipped { reason: String },
}

/// Outcome of validating one feature.
#[derive(Debug, Clone)]
pub struct FeatureValidation {
    pub feature: FeatureKind,
    pub metric: MetricKind,
    pub metric_value: Option<f64>,
    pub threshold: f64,
    pub verdict: Verdict,
    pub train_size: usize,
    pub validation_size: usize,
    /// Validation records whose prediction fell back to the sentinel.
    pub failures: usize,
    /// Reported alongside the checked metric, never used for the verdict.
    pub secondary: BTreeMap<&'static str, f64>,
    pub confusion: Option<ConfusionMatrix>,
}

impl FeatureValidation {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }

    fn skipped(descriptor: &FeatureDescriptor, reason: String, train: usize, val: usize) -> Self {
        Self {
            feature: descriptor.kind,
            metric: descriptor.metric(),
            metric_value: None,
            threshold: descriptor.validation_threshold,
            verdict: Verdict::Skipped { reason },
            train_size: train,
            validation_size: val,
            failures: 0,
            secondary: BTreeMap::new(),
            confusion: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub verdict: Verdict,
    pub metric: MetricKind,
    pub metric_value: Option<f64>,
    pub threshold: f64,
    pub validated_at: DateTime<Utc>,
}

/// Latest verdict per feature, persisted as `verdicts.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerdictBook {
    entries: BTreeMap<String, VerdictRecord>,
}

impl VerdictBook {
    /// A missing file is an empty book.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, self)
    }

    pub fn record(&mut self, outcome: &FeatureValidation) {
        self.entries.insert(
            outcome.feature.name().to_string(),
            VerdictRecord {
                verdict: outcome.verdict.clone(),
                metric: outcome.metric,
                metric_value: outcome.metric_value,
                threshold: outcome.threshold,
                validated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, feature: FeatureKind) -> Option<&VerdictRecord> {
        self.entries.get(feature.name())
    }

    pub fn is_passed(&self, feature: FeatureKind) -> bool {
        matches!(self.get(feature), Some(r) if r.verdict == Verdict::Passed)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Score the validation split with train-derived calibration examples and
/// judge the result against the descriptor's threshold.
pub async fn validate<O: ScoringOracle + ?Sized>(
    descriptor: &FeatureDescriptor,
    train: &LabeledSample,
    validation: &LabeledSample,
    oracle: &O,
    report: &mut ValidationReport,
) -> FeatureValidation {
    let feature = descriptor.kind;
    let train_items = train.labeled_for(feature);
    let val_items = validation.labeled_for(feature);
    report.log(format!(
        "[{feature}] labeled records: train={} validation={}",
        train_items.len(),
        val_items.len()
    ));

    if train_items.is_empty() || val_items.is_empty() {
        let reason = format!(
            "no labeled records in the {} split",
            if train_items.is_empty() { "train" } else { "validation" }
        );
        warn!(feature = %feature, %reason, "skipping validation");
        report.log(format!("[{feature}] SKIPPED: {reason}"));
        return FeatureValidation::skipped(descriptor, reason, train_items.len(), val_items.len());
    }

    let examples: Vec<CalibrationExample> = train_items
        .iter()
        .map(|item| CalibrationExample::new(item.text.clone(), item.value.clone()))
        .collect();

    let mut y_true = Vec::with_capacity(val_items.len());
    let mut y_pred = Vec::with_capacity(val_items.len());
    let mut failures = 0usize;
    for item in &val_items {
        let outcome = score_record(oracle, descriptor, &item.text, &examples).await;
        if let Some(reason) = outcome.failure() {
            failures += 1;
            warn!(
                record_id = %item.record_id,
                feature = %feature,
                %reason,
                "oracle failed; using sentinel"
            );
            report.log(format!("[{feature}] {}: oracle failure ({reason})", item.record_id));
        }
        let predicted = outcome.value_or_sentinel(descriptor);
        report.log(format!(
            "[{feature}] {}: true={} predicted={}",
            item.record_id, item.value, predicted
        ));
        y_true.push(item.value.clone());
        y_pred.push(predicted);
    }

    let mut secondary = BTreeMap::new();
    let mut confusion = None;
    let metric = descriptor.metric();
    let metric_value = match descriptor.value_type {
        ValueType::Ordinal => {
            let t: Vec<i64> = y_true.iter().map(as_ordinal).collect();
            let p: Vec<i64> = y_pred.iter().map(as_ordinal).collect();
            if let Some(exact) = exact_accuracy(&t, &p) {
                secondary.insert("exact_accuracy", exact);
            }
            if let Some(binary) = descriptor.cutoff.and_then(|c| binary_accuracy(&t, &p, c)) {
                secondary.insert("binary_accuracy", binary);
            }
            confusion = Some(ConfusionMatrix::build(&t, &p));
            adjacent_accuracy(&t, &p, ADJACENT_TOLERANCE)
        }
        ValueType::Continuous => {
            let t: Vec<f64> = y_true.iter().map(as_continuous).collect();
            let p: Vec<f64> = y_pred.iter().map(as_continuous).collect();
            if let Some(polarity) = polarity_agreement(&t, &p) {
                secondary.insert("polarity_agreement", polarity);
            }
            mean_absolute_error(&t, &p)
        }
        ValueType::Categorical => {
            let t: Vec<String> = y_true.iter().map(ToString::to_string).collect();
            let p: Vec<String> = y_pred.iter().map(ToString::to_string).collect();
            confusion = Some(ConfusionMatrix::build(&t, &p));
            exact_accuracy(&t, &p)
        }
    };

    let Some(value) = metric_value else {
        let reason = "metric undefined for the validation split".to_string();
        report.log(format!("[{feature}] SKIPPED: {reason}"));
        return FeatureValidation::skipped(descriptor, reason, train_items.len(), val_items.len());
    };

    let passed = metric.passes(value, descriptor.validation_threshold);
    let verdict = if passed { Verdict::Passed } else { Verdict::Failed };
    let direction = if metric.higher_is_better() { ">=" } else { "<=" };

    for (name, v) in &secondary {
        report.log(format!("[{feature}] {name} = {v:.4}"));
    }
    if let Some(cm) = &confusion {
        report.log(format!("[{feature}] confusion matrix (rows true, columns predicted):\n{cm}"));
        if descriptor.value_type == ValueType::Categorical {
            for stats in cm.label_stats() {
                report.log(format!(
                    "[{feature}] label {}: precision={:.3} recall={:.3} support={}",
                    stats.label, stats.precision, stats.recall, stats.support
                ));
            }
        }
    }
    report.log(format!(
        "[{feature}] {metric} = {value:.4} (threshold {direction} {}) sentinel fallbacks={failures} -> {}",
        descriptor.validation_threshold,
        if passed { "PASSED" } else { "FAILED" }
    ));

    FeatureValidation {
        feature,
        metric,
        metric_value: Some(value),
        threshold: descriptor.validation_threshold,
        verdict,
        train_size: train_items.len(),
        validation_size: val_items.len(),
        failures,
        secondary,
        confusion,
    }
}

fn as_ordinal(value: &FeatureValue) -> i64 {
    match value {
        FeatureValue::Ordinal(v) => *v,
        other => other
            .as_f64()
            .map(|f| f.trunc() as i64)
            .unwrap_or(ORDINAL_SENTINEL),
    }
}

fn as_continuous(value: &FeatureValue) -> f64 {
    value.as_f64().unwrap_or(crate::feature::CONTINUOUS_SENTINEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_file_name_is_timestamped() {
        let report = ValidationReport::new();
        let name = report.file_name();
        assert!(name.starts_with("validation_report_"));
        assert!(name.ends_with(".txt"));
        // validation_report_YYYYmmdd_HHMMSS.txt
        assert_eq!(name.len(), "validation_report_".len() + 15 + 4);
    }

    #[test]
    fn report_saves_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ValidationReport::new();
        report.log("first");
        report.log("second");
        let path = report.save(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn verdict_book_round_trips_and_gates_on_pass_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdicts.json");
        let mut book = VerdictBook::load(&path).unwrap();
        assert!(!book.is_passed(FeatureKind::Sentiment));

        let descriptor = FeatureDescriptor::new(FeatureKind::Sentiment, 0.25, None);
        let mut outcome = FeatureValidation::skipped(&descriptor, "none".into(), 0, 0);
        book.record(&outcome);
        assert!(!book.is_passed(FeatureKind::Sentiment));

        outcome.verdict = Verdict::Passed;
        outcome.metric_value = Some(0.1);
        book.record(&outcome);
        book.save(&path).unwrap();

        let loaded = VerdictBook::load(&path).unwrap();
        assert!(loaded.is_passed(FeatureKind::Sentiment));
        assert_eq!(loaded.get(FeatureKind::Sentiment).unwrap().metric_value, Some(0.1));
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"status\": \"passed\""));
    }
}
