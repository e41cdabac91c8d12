//! Leakage-safe train/validation sampling for human labeling.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::manual_overlap;
use crate::feature::FeatureKind;
use crate::labeled::LabeledSample;
use crate::record::Record;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("record ids forced into both train and validation: {0:?}")]
    ManualIdOverlap(Vec<String>),
    #[error("validation ratio must be within [0, 1], got {0}")]
    InvalidRatio(f64),
}

#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub sample_size: usize,
    pub seed: u64,
    pub validation_ratio: f64,
    pub manual_train_ids: Vec<String>,
    pub manual_val_ids: Vec<String>,
}

impl SampleRequest {
    /// `(train_target, validation_target)`; validation is rounded down.
    pub fn quotas(&self) -> (usize, usize) {
        let val = (self.sample_size as f64 * self.validation_ratio).floor() as usize;
        let val = val.min(self.sample_size);
        (self.sample_size - val, val)
    }
}

/// Conditions that did not stop the draw but deserve a look.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleWarnings {
    pub missing_train_ids: Vec<String>,
    pub missing_val_ids: Vec<String>,
    /// Random records requested but not available in the pool.
    pub shortfall: usize,
}

impl SampleWarnings {
    pub fn is_empty(&self) -> bool {
        self.missing_train_ids.is_empty() && self.missing_val_ids.is_empty() && self.shortfall == 0
    }
}

#[derive(Debug, Clone)]
pub struct SampleDraw {
    pub train: Vec<Record>,
    pub validation: Vec<Record>,
    pub warnings: SampleWarnings,
}

impl SampleDraw {
    /// Labeling exports for both splits.
    pub fn to_labeling(
        &self,
        display_columns: &[String],
        features: &[FeatureKind],
    ) -> (LabeledSample, LabeledSample) {
        (
            LabeledSample::for_labeling(&self.train, display_columns, features),
            LabeledSample::for_labeling(&self.validation, display_columns, features),
        )
    }
}

/// Draw a train and a validation split from `pool`.
///
/// Manual picks fill their side first and count against its quota. The
/// rest is drawn without replacement from records in neither manual list;
/// the first random picks go to train, the remainder to validation. The pool
/// is ordered by `record_id` before shuffling, so the result depends only on
/// the pool's contents and the seed.
pub fn draw(pool: &[Record], request: &SampleRequest) -> Result<SampleDraw, SampleError> {
    let ratio = request.validation_ratio;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(SampleError::InvalidRatio(ratio));
    }
    let overlap = manual_overlap(&request.manual_train_ids, &request.manual_val_ids);
    if !overlap.is_empty() {
        return Err(SampleError::ManualIdOverlap(overlap));
    }

    let train_ids: HashSet<&str> = request.manual_train_ids.iter().map(String::as_str).collect();
    let val_ids: HashSet<&str> = request.manual_val_ids.iter().map(String::as_str).collect();

    let mut manual_train = Vec::new();
    let mut manual_val = Vec::new();
    let mut remaining = Vec::new();
    let mut seen = HashSet::new();
    for record in pool {
        if !seen.insert(record.record_id.as_str()) {
            continue;
        }
        if train_ids.contains(record.record_id.as_str()) {
            manual_train.push(record.clone());
        } else if val_ids.contains(record.record_id.as_str()) {
            manual_val.push(record.clone());
        } else {
            remaining.push(record);
        }
    }

    let mut warnings = SampleWarnings {
        missing_train_ids: missing(&request.manual_train_ids, &seen),
        missing_val_ids: missing(&request.manual_val_ids, &seen),
        shortfall: 0,
    };
    if !warnings.missing_train_ids.is_empty() {
        warn!(ids = ?warnings.missing_train_ids, "manual train ids not found in pool");
    }
    if !warnings.missing_val_ids.is_empty() {
        warn!(ids = ?warnings.missing_val_ids, "manual validation ids not found in pool");
    }

    let (train_target, val_target) = request.quotas();
    let random_train = train_target.saturating_sub(manual_train.len());
    let random_val = val_target.saturating_sub(manual_val.len());
    let requested = random_train + random_val;
    info!(
        manual_train = manual_train.len(),
        manual_val = manual_val.len(),
        random_train,
        random_val,
        pool = remaining.len(),
        "drawing labeling sample"
    );

    remaining.sort_by(|a, b| a.record_id.cmp(&b.record_id));
    let mut rng = StdRng::seed_from_u64(request.seed);
    remaining.shuffle(&mut rng);
    if remaining.len() < requested {
        warnings.shortfall = requested - remaining.len();
        warn!(
            requested,
            available = remaining.len(),
            "pool is smaller than requested; taking everything available"
        );
    }
    remaining.truncate(requested);

    let split = random_train.min(remaining.len());
    let mut train = manual_train;
    train.extend(remaining[..split].iter().map(|r| (*r).clone()));
    let mut validation = manual_val;
    validation.extend(remaining[split..].iter().map(|r| (*r).clone()));

    Ok(SampleDraw {
        train,
        validation,
        warnings,
    })
}

fn missing(requested: &[String], present: &HashSet<&str>) -> Vec<String> {
    let mut out: Vec<String> = requested
        .iter()
        .filter(|id| !present.contains(id.as_str()))
        .cloned()
        .collect();
    out.sort();
    out.dedup();
    out
}
