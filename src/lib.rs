#![forbid(unsafe_code)]

//! # discourse-features
//!
//! Calibrated LLM feature generation for discourse research corpora.
//!
//! Each feature (relevance, stance, argument quality, sentiment, tone, frame)
//! flows through the same protocol: draw a leakage-safe labeling sample,
//! validate the scoring oracle against held-out human labels using the train
//! split as few-shot calibration, and only after a passing verdict run
//! resumable, batch-checkpointed generation over the whole corpus. The
//! feature tables are finally joined back onto the corpus and filtered by
//! relevance.

pub mod assemble;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod feature;
pub mod gateway;
pub mod generation;
pub mod labeled;
pub mod metrics;
pub mod oracle;
pub mod pipeline;
pub mod prepare;
pub mod prompts;
pub mod record;
pub mod sampler;
pub mod store;
pub mod validation;

pub use cache::{ScoreCache, ScoreCacheKey, SqliteScoreCache};
pub use config::{ConfigError, PipelineConfig};
pub use error::PipelineError;
pub use feature::{FeatureCatalog, FeatureDescriptor, FeatureKind, FeatureValue, ValueType};
pub use gateway::{Attribution, ChatGateway, ProviderGateway, UsageSink};
pub use generation::{generate, GenerateOptions, GenerationError, GenerationSummary, PilotConfig};
pub use oracle::{
    score_record, CalibrationExample, FailureReason, LlmOracle, OracleError, OracleOutcome,
    ScoringOracle,
};
pub use pipeline::{GenerateOverrides, Pipeline, SampleOutcome};
pub use record::Record;
pub use sampler::{draw, SampleDraw, SampleRequest};
pub use store::{FeatureRow, FeatureTable, FeatureTableStore, RecordStore, StoreError};
pub use validation::{validate, FeatureValidation, ValidationReport, Verdict, VerdictBook};
