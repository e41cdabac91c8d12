//! Agreement metrics between human labels and oracle predictions.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::feature::ValueType;

/// Metric checked against a feature's validation threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Fraction of ordinal predictions within ±1 of the label.
    AdjacentAccuracy,
    /// Mean absolute error of continuous predictions.
    MeanAbsoluteError,
    /// Fraction of exact categorical matches.
    ExactAccuracy,
}

impl MetricKind {
    pub fn for_value_type(value_type: ValueType) -> Self {
        match value_type {
            ValueType::Ordinal => MetricKind::AdjacentAccuracy,
            ValueType::Continuous => MetricKind::MeanAbsoluteError,
            ValueType::Categorical => MetricKind::ExactAccuracy,
        }
    }

    /// Accuracy metrics improve upward, error metrics downward.
    pub fn higher_is_better(&self) -> bool {
        match self {
            MetricKind::AdjacentAccuracy | MetricKind::ExactAccuracy => true,
            MetricKind::MeanAbsoluteError => false,
        }
    }

    /// Accuracy passes at or above the threshold; error passes at or below it.
    pub fn passes(&self, value: f64, threshold: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.higher_is_better() {
            value >= threshold
        } else {
            value <= threshold
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::AdjacentAccuracy => "adjacent_accuracy",
            MetricKind::MeanAbsoluteError => "mean_absolute_error",
            MetricKind::ExactAccuracy => "exact_accuracy",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn paired<'a, T>(y_true: &'a [T], y_pred: &'a [T]) -> Option<impl Iterator<Item = (&'a T, &'a T)>> {
    if y_true.is_empty() || y_true.len() != y_pred.len() {
        return None;
    }
    Some(y_true.iter().zip(y_pred))
}

/// Fraction of pairs with `|true - pred| <= tolerance`.
pub fn adjacent_accuracy(y_true: &[i64], y_pred: &[i64], tolerance: i64) -> Option<f64> {
    let n = y_true.len() as f64;
    let hits = paired(y_true, y_pred)?
        .filter(|(t, p)| t.abs_diff(**p) <= tolerance.unsigned_abs())
        .count();
    Some(hits as f64 / n)
}

pub fn exact_accuracy<T: PartialEq>(y_true: &[T], y_pred: &[T]) -> Option<f64> {
    let n = y_true.len() as f64;
    let hits = paired(y_true, y_pred)?.filter(|(t, p)| t == p).count();
    Some(hits as f64 / n)
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> Option<f64> {
    let n = y_true.len() as f64;
    let total: f64 = paired(y_true, y_pred)?.map(|(t, p)| (t - p).abs()).sum();
    Some(total / n)
}

/// Exact accuracy after thresholding both sides at `cutoff` (`>= cutoff` is 1).
pub fn binary_accuracy(y_true: &[i64], y_pred: &[i64], cutoff: i64) -> Option<f64> {
    let n = y_true.len() as f64;
    let hits = paired(y_true, y_pred)?
        .filter(|(t, p)| (**t >= cutoff) == (**p >= cutoff))
        .count();
    Some(hits as f64 / n)
}

/// Fraction of pairs whose signs agree (zero is its own sign).
pub fn polarity_agreement(y_true: &[f64], y_pred: &[f64]) -> Option<f64> {
    fn sign(v: f64) -> i8 {
        if v > 0.0 {
            1
        } else if v < 0.0 {
            -1
        } else {
            0
        }
    }
    let n = y_true.len() as f64;
    let hits = paired(y_true, y_pred)?
        .filter(|(t, p)| sign(**t) == sign(**p))
        .count();
    Some(hits as f64 / n)
}

// =============================================================================
// Confusion matrix
// =============================================================================

/// Counts of (true label, predicted label) pairs over the union of labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    /// `counts[i][j]`: true label `labels[i]` predicted as `labels[j]`.
    pub counts: Vec<Vec<usize>>,
}

/// Per-label precision and recall.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelStats {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub support: usize,
}

impl ConfusionMatrix {
    /// Build from displayable labels; ordinal labels sort numerically when
    /// passed as integers.
    pub fn build<T: Ord + Clone + fmt::Display>(y_true: &[T], y_pred: &[T]) -> Self {
        let labels: Vec<T> = y_true
            .iter()
            .chain(y_pred)
            .cloned()
            .collect::<BTreeSet<T>>()
            .into_iter()
            .collect();
        let index = |v: &T| labels.binary_search(v).unwrap_or(0);

        let mut counts = vec![vec![0usize; labels.len()]; labels.len()];
        for (t, p) in y_true.iter().zip(y_pred) {
            counts[index(t)][index(p)] += 1;
        }
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            counts,
        }
    }

    pub fn label_stats(&self) -> Vec<LabelStats> {
        (0..self.labels.len())
            .map(|i| {
                let tp = self.counts[i][i];
                let support: usize = self.counts[i].iter().sum();
                let predicted: usize = self.counts.iter().map(|row| row[i]).sum();
                let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
                LabelStats {
                    label: self.labels[i].clone(),
                    precision: ratio(tp, predicted),
                    recall: ratio(tp, support),
                    support,
                }
            })
            .collect()
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(|l| l.len())
            .max()
            .unwrap_or(1)
            .max(5);
        write!(f, "{:>width$}", "t\\p")?;
        for label in &self.labels {
            write!(f, " {label:>width$}")?;
        }
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "\n{label:>width$}")?;
            for count in row {
                write!(f, " {count:>width$}")?;
            }
        }
        Ok(())
    }
}
