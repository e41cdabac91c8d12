//! Stage runners: prepare → sample → validate → (gate) → generate → assemble.
//!
//! Each stage reads its inputs from the [`RecordStore`] under the configured
//! data directory and writes its outputs back there. Required inputs are
//! checked before anything is written.
//!
//! Usage:
//! ```bash
//! discourse sample --config pipeline.json
//! discourse validate --config pipeline.json --feature political_stance
//! discourse generate --config pipeline.json --pilot
//! ```

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::assemble::assemble;
use crate::cache::SqliteScoreCache;
use crate::config::{ConfigError, PipelineConfig};
use crate::error::PipelineError;
use crate::feature::{FeatureCatalog, FeatureKind};
use crate::gateway::{GatewayConfig, ProviderGateway, TracingUsageSink};
use crate::generation::{check_gate, generate, GenerateOptions, GenerationSummary, PilotConfig};
use crate::labeled::LabeledSample;
use crate::oracle::{LlmOracle, ScoringOracle};
use crate::prepare::{prepare_records, PrepareStats, RawComment, RawPost};
use crate::sampler::{draw, SampleRequest, SampleWarnings};
use crate::store::{read_json, write_json_atomic, FeatureTable, FeatureTableStore, RecordStore};
use crate::validation::{
    validate, FeatureValidation, ValidationError, ValidationReport, VerdictBook,
};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Both sample files were already present; nothing was written.
    AlreadyExists,
    Written {
        train: usize,
        validation: usize,
        warnings: SampleWarnings,
    },
}

/// Per-invocation overrides of the generation block.
#[derive(Debug, Clone, Default)]
pub struct GenerateOverrides {
    /// Force pilot mode on (`Some(true)`) or off (`Some(false)`).
    pub pilot: Option<bool>,
    pub skip_gate: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembleSummary {
    pub base_records: usize,
    pub kept: usize,
    pub features: Vec<FeatureKind>,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ValidateSummary {
    pub outcomes: Vec<FeatureValidation>,
    pub report_path: PathBuf,
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    catalog: FeatureCatalog,
    store: RecordStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let catalog = config.catalog()?;
        let store = RecordStore::new(&config.data_dir);
        Ok(Self {
            config,
            catalog,
            store,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Flatten raw posts and comments into the base corpus snapshot.
    pub fn prepare(&self) -> Result<PrepareStats, PipelineError> {
        let posts_path = self.store.raw_posts_path();
        let comments_path = self.store.raw_comments_path();
        let posts: Vec<RawPost> = read_json(&posts_path)?
            .ok_or_else(|| ConfigError::MissingInput(posts_path.clone()))?;
        let comments: Vec<RawComment> = read_json(&comments_path)?
            .ok_or_else(|| ConfigError::MissingInput(comments_path.clone()))?;

        let (records, stats) = prepare_records(&posts, &comments);
        self.store.write_records(&records)?;
        info!(
            comments_in = stats.comments_in,
            orphaned = stats.orphaned,
            noise_comments = stats.noise_comments,
            noise_posts = stats.noise_posts,
            duplicates = stats.duplicates,
            records_out = stats.records_out,
            "base corpus written"
        );
        Ok(stats)
    }

    /// Draw train/validation labeling samples, unless both already exist.
    pub fn sample(&self) -> Result<SampleOutcome, PipelineError> {
        let train_path = self.store.train_sample_path();
        let val_path = self.store.val_sample_path();
        if train_path.exists() && val_path.exists() {
            info!(
                train = %train_path.display(),
                validation = %val_path.display(),
                "labeling samples already exist; not overwriting"
            );
            return Ok(SampleOutcome::AlreadyExists);
        }

        let sampling = &self.config.sampling;
        let features = sampling
            .features_to_label
            .iter()
            .map(|name| name.parse::<FeatureKind>())
            .collect::<Result<Vec<_>, _>>()?;
        let pool = self
            .store
            .read_records()
            .map_err(PipelineError::from_required_input)?;

        let request = SampleRequest {
            sample_size: sampling.sample_size,
            seed: sampling.seed,
            validation_ratio: sampling.validation_ratio,
            manual_train_ids: sampling.manual_train_ids.clone(),
            manual_val_ids: sampling.manual_val_ids.clone(),
        };
        let drawn = draw(&pool, &request)?;
        let (train, validation) = drawn.to_labeling(&sampling.display_columns, &features);
        train.save(&train_path)?;
        validation.save(&val_path)?;
        info!(
            train = train.len(),
            validation = validation.len(),
            "labeling samples written"
        );

        Ok(SampleOutcome::Written {
            train: train.len(),
            validation: validation.len(),
            warnings: drawn.warnings,
        })
    }

    /// Validate the selected features (all configured ones when `features`
    /// is empty), then persist the report and the updated verdicts.
    pub async fn validate<O: ScoringOracle + ?Sized>(
        &self,
        oracle: &O,
        features: &[String],
    ) -> Result<ValidateSummary, PipelineError> {
        let descriptors = self
            .config
            .select_features(features, &self.config.features_to_validate)?;
        let train = LabeledSample::load(&self.store.train_sample_path())
            .map_err(PipelineError::from_required_input)?;
        let validation = LabeledSample::load(&self.store.val_sample_path())
            .map_err(PipelineError::from_required_input)?;
        let verdicts_path = self.store.verdicts_path();
        let mut book = VerdictBook::load(&verdicts_path)?;

        let mut report = ValidationReport::new();
        report.log(format!(
            "Validation run: model={} train={} validation={} features={}",
            self.config.model,
            train.len(),
            validation.len(),
            descriptors.len()
        ));

        let mut outcomes = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let outcome = validate(descriptor, &train, &validation, oracle, &mut report).await;
            book.record(&outcome);
            outcomes.push(outcome);
        }

        let passed = outcomes.iter().filter(|o| o.passed()).count();
        report.log(format!("Summary: {passed}/{} features passed", outcomes.len()));
        let report_path = report
            .save(&self.store.reports_dir())
            .map_err(ValidationError::from)?;
        book.save(&verdicts_path)
            .map_err(ValidationError::from)?;
        info!(report = %report_path.display(), passed, "validation finished");

        Ok(ValidateSummary {
            outcomes,
            report_path,
        })
    }

    /// Generation options from the config block and the CLI overrides.
    ///
    /// A pilot forced on from the command line is held to the same size
    /// rule as one enabled in the config.
    pub fn generate_options(
        &self,
        overrides: &GenerateOverrides,
    ) -> Result<GenerateOptions, ConfigError> {
        let generation = &self.config.generation;
        let pilot_mode = overrides.pilot.unwrap_or(generation.pilot_mode);
        if pilot_mode && generation.pilot_size == 0 {
            return Err(ConfigError::invalid("pilot_size must be at least 1"));
        }
        Ok(GenerateOptions {
            batch_size: generation.batch_size,
            pilot: pilot_mode.then_some(PilotConfig {
                size: generation.pilot_size,
                seed: generation.pilot_seed,
            }),
        })
    }

    /// Generate the selected features in order. Every gate is checked before
    /// the first oracle call; a cancelled feature ends the run.
    pub async fn generate<O: ScoringOracle + ?Sized>(
        &self,
        oracle: &O,
        features: &[String],
        overrides: &GenerateOverrides,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<Vec<GenerationSummary>, PipelineError> {
        let descriptors = self
            .config
            .select_features(features, &self.config.features_to_generate)?;
        let options = self.generate_options(overrides)?;
        let corpus = self
            .store
            .read_records()
            .map_err(PipelineError::from_required_input)?;
        let train = LabeledSample::load(&self.store.train_sample_path())
            .map_err(PipelineError::from_required_input)?;
        let book = VerdictBook::load(&self.store.verdicts_path())?;
        for descriptor in &descriptors {
            check_gate(&book, descriptor.kind, &options, overrides.skip_gate)?;
        }

        let mut summaries = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let summary = generate(
                descriptor,
                &corpus,
                &train,
                &self.store,
                &options,
                oracle,
                cancel_flag,
            )
            .await?;
            let cancelled = summary.cancelled;
            summaries.push(summary);
            if cancelled {
                break;
            }
        }
        Ok(summaries)
    }

    /// Join every available feature table onto the corpus, filter by
    /// relevance and write the analysis dataset.
    pub fn assemble(&self) -> Result<AssembleSummary, PipelineError> {
        let base = self
            .store
            .read_records()
            .map_err(PipelineError::from_required_input)?;
        let relevance = self.config.relevance_kind()?;

        let mut tables: Vec<FeatureTable> = Vec::new();
        for descriptor in self.catalog.iter() {
            match self.store.load_table(descriptor.kind)? {
                Some(table) => tables.push(table),
                None => {
                    warn!(feature = %descriptor.kind, "no feature table; column will be null");
                    tables.push(FeatureTable::new(descriptor.kind));
                }
            }
        }
        if !tables.iter().any(|t| t.feature == relevance && !t.is_empty()) {
            warn!(feature = %relevance, "relevance table missing; every row will be filtered out");
        }

        let rows = assemble(&base, &tables, relevance, self.config.relevance_cutoff);
        let path = self.store.assembled_path();
        write_json_atomic(&path, &rows)?;
        info!(
            base = base.len(),
            kept = rows.len(),
            cutoff = self.config.relevance_cutoff,
            path = %path.display(),
            "dataset assembled"
        );

        Ok(AssembleSummary {
            base_records: base.len(),
            kept: rows.len(),
            features: tables
                .iter()
                .filter(|t| !t.is_empty())
                .map(|t| t.feature)
                .collect(),
            path,
        })
    }

    /// LLM oracle over OpenRouter, with the response cache when enabled.
    pub fn build_oracle(&self) -> Result<(LlmOracle, Arc<TracingUsageSink>), PipelineError> {
        let usage = Arc::new(TracingUsageSink::new());
        let gateway = ProviderGateway::from_env(
            usage.clone(),
            GatewayConfig {
                max_retries: self.config.max_retries,
                ..GatewayConfig::default()
            },
        )?;
        let mut oracle =
            LlmOracle::new(Arc::new(gateway), self.config.model.clone()).with_run(Uuid::new_v4());
        if self.config.cache_responses {
            let cache = SqliteScoreCache::new(self.store.cache_path())?;
            oracle = oracle.with_cache(Arc::new(cache));
        }
        Ok((oracle, usage))
    }
}
