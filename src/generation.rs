//! Resumable bulk scoring of the corpus for one feature.
//!
//! Records already present in the feature table are skipped, so a run that
//! stopped for any reason is finished by running it again. Results are
//! buffered and flushed every `batch_size` records and at the end of the
//! queue; a crash or cancellation loses at most the unflushed buffer.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::checkpoint::FeatureCheckpoint;
use crate::feature::{FeatureDescriptor, FeatureKind};
use crate::labeled::LabeledSample;
use crate::oracle::{score_record, ScoringOracle};
use crate::record::Record;
use crate::store::{FeatureRow, FeatureTableStore, StoreError};
use crate::validation::VerdictBook;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("checkpoint failed: {0}")]
    Store(#[from] StoreError),
    #[error("{feature} has no passing validation verdict; validate it, run a pilot, or skip the gate")]
    NotValidated { feature: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PilotConfig {
    pub size: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateOptions {
    pub batch_size: usize,
    /// Cap the queue to a seeded random subset.
    pub pilot: Option<PilotConfig>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            batch_size: 25,
            pilot: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSummary {
    pub feature: FeatureKind,
    /// Rows present in the table before this run.
    pub already_processed: usize,
    pub queued: usize,
    pub processed: usize,
    /// Records stored as the type sentinel.
    pub failures: usize,
    pub flushes: usize,
    pub cancelled: bool,
    /// Buffered rows dropped on cancellation.
    pub discarded: usize,
}

impl GenerationSummary {
    fn new(feature: FeatureKind) -> Self {
        Self {
            feature,
            already_processed: 0,
            queued: 0,
            processed: 0,
            failures: 0,
            flushes: 0,
            cancelled: false,
            discarded: 0,
        }
    }
}

/// Refuse a production run for a feature without a passing verdict.
/// Pilot runs are always allowed.
pub fn check_gate(
    verdicts: &VerdictBook,
    feature: FeatureKind,
    options: &GenerateOptions,
    skip_gate: bool,
) -> Result<(), GenerationError> {
    if options.pilot.is_some() || verdicts.is_passed(feature) {
        return Ok(());
    }
    if skip_gate {
        warn!(feature = %feature, "generating without a passing validation verdict");
        return Ok(());
    }
    Err(GenerationError::NotValidated {
        feature: feature.name().to_string(),
    })
}

/// Records still to be scored, in corpus order, optionally cut to a pilot.
pub fn work_queue<'a>(
    corpus: &'a [Record],
    processed: &HashSet<String>,
    pilot: Option<PilotConfig>,
) -> Vec<&'a Record> {
    let mut seen = HashSet::new();
    let mut queue: Vec<&Record> = corpus
        .iter()
        .filter(|r| !processed.contains(&r.record_id))
        .filter(|r| seen.insert(r.record_id.as_str()))
        .collect();

    if let Some(pilot) = pilot {
        if queue.len() > pilot.size {
            let mut picked = queue.clone();
            picked.sort_by(|a, b| a.record_id.cmp(&b.record_id));
            let mut rng = StdRng::seed_from_u64(pilot.seed);
            picked.shuffle(&mut rng);
            let keep: HashSet<&str> = picked[..pilot.size]
                .iter()
                .map(|r| r.record_id.as_str())
                .collect();
            queue.retain(|r| keep.contains(r.record_id.as_str()));
        }
    }
    queue
}

/// Score every unprocessed corpus record for `descriptor`'s feature.
///
/// Calibration examples come from `train` once per run. A record whose
/// oracle call fails is stored as the sentinel; only a failed checkpoint
/// write stops the run. `cancel_flag` is checked before each record.
pub async fn generate<O, S>(
    descriptor: &FeatureDescriptor,
    corpus: &[Record],
    train: &LabeledSample,
    store: &S,
    options: &GenerateOptions,
    oracle: &O,
    cancel_flag: Option<&AtomicBool>,
) -> Result<GenerationSummary, GenerationError>
where
    O: ScoringOracle + ?Sized,
    S: FeatureTableStore + ?Sized,
{
    let feature = descriptor.kind;
    let batch_size = options.batch_size.max(1);
    let mut summary = GenerationSummary::new(feature);

    let mut checkpoint = FeatureCheckpoint::new(store, feature);
    let processed = checkpoint.load()?;
    summary.already_processed = processed.len();

    let queue = work_queue(corpus, &processed, options.pilot);
    summary.queued = queue.len();
    info!(
        feature = %feature,
        already_processed = processed.len(),
        queued = queue.len(),
        pilot = options.pilot.is_some(),
        batch_size,
        "generation queue built"
    );
    if queue.is_empty() {
        info!(feature = %feature, "nothing to generate");
        return Ok(summary);
    }

    let examples = train.calibration_examples(feature);
    if examples.is_empty() {
        warn!(feature = %feature, "no labeled train examples; scoring without calibration");
    }

    for record in queue {
        if let Some(flag) = cancel_flag {
            if flag.load(Ordering::Relaxed) {
                summary.cancelled = true;
                summary.flushes = checkpoint.flushes();
                summary.discarded = checkpoint.discard();
                warn!(
                    feature = %feature,
                    processed = summary.processed,
                    discarded = summary.discarded,
                    "generation cancelled; unflushed results dropped"
                );
                return Ok(summary);
            }
        }

        let outcome = score_record(oracle, descriptor, &record.text_content, &examples).await;
        if let Some(reason) = outcome.failure() {
            summary.failures += 1;
            warn!(
                record_id = %record.record_id,
                feature = %feature,
                %reason,
                "oracle failed; storing sentinel"
            );
        }
        checkpoint.append(FeatureRow {
            record_id: record.record_id.clone(),
            value: outcome.value_or_sentinel(descriptor),
        });
        summary.processed += 1;

        if checkpoint.pending() >= batch_size {
            checkpoint.flush()?;
            info!(
                feature = %feature,
                processed = summary.processed,
                queued = summary.queued,
                "batch checkpointed"
            );
        }
    }
    checkpoint.flush()?;
    summary.flushes = checkpoint.flushes();

    info!(
        feature = %feature,
        processed = summary.processed,
        failures = summary.failures,
        flushes = summary.flushes,
        "generation finished"
    );
    Ok(summary)
}
