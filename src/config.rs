//! Pipeline configuration.
//!
//! Loaded once from a JSON file by the caller and threaded explicitly into
//! every stage. Missing keys fall back to the research defaults.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::feature::{FeatureCatalog, FeatureDescriptor, FeatureEntry, FeatureKind};

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("unknown feature: {0}")]
    UnknownFeature(String),
    #[error("duplicate descriptor for feature {0}")]
    DuplicateDescriptor(String),
    #[error("no descriptor configured for feature {0}")]
    MissingDescriptor(String),
    #[error("required input file is missing: {0}")]
    MissingInput(PathBuf),
    #[error("record ids forced into both train and validation: {0:?}")]
    ManualIdOverlap(Vec<String>),
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Share of the sample that goes to the validation split (rounded down).
    #[serde(default = "default_validation_ratio")]
    pub validation_ratio: f64,
    #[serde(default)]
    pub manual_train_ids: Vec<String>,
    #[serde(default)]
    pub manual_val_ids: Vec<String>,
    #[serde(default = "default_display_columns")]
    pub display_columns: Vec<String>,
    #[serde(default = "all_feature_names")]
    pub features_to_label: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            seed: default_seed(),
            validation_ratio: default_validation_ratio(),
            manual_train_ids: Vec::new(),
            manual_val_ids: Vec::new(),
            display_columns: default_display_columns(),
            features_to_label: all_feature_names(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub pilot_mode: bool,
    #[serde(default = "default_pilot_size")]
    pub pilot_size: usize,
    #[serde(default = "default_pilot_seed")]
    pub pilot_seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pilot_mode: false,
            pilot_size: default_pilot_size(),
            pilot_seed: default_pilot_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_model")]
    pub model: String,
    /// Cache well-formed oracle responses in `cache/scores.sqlite`.
    #[serde(default)]
    pub cache_responses: bool,
    /// Transport retries for retryable provider errors.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default = "default_relevance_feature")]
    pub relevance_feature: String,
    #[serde(default = "default_relevance_cutoff")]
    pub relevance_cutoff: f64,
    #[serde(default = "default_feature_entries")]
    pub features: Vec<FeatureEntry>,
    #[serde(default = "all_feature_names")]
    pub features_to_validate: Vec<String>,
    #[serde(default = "all_feature_names")]
    pub features_to_generate: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            model: default_model(),
            cache_responses: false,
            max_retries: 0,
            sampling: SamplingConfig::default(),
            generation: GenerationConfig::default(),
            relevance_feature: default_relevance_feature(),
            relevance_cutoff: default_relevance_cutoff(),
            features: default_feature_entries(),
            features_to_validate: all_feature_names(),
            features_to_generate: all_feature_names(),
        }
    }
}

impl PipelineConfig {
    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::MissingInput(path.to_path_buf())
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail part-way through a stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.sampling.validation_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::invalid(format!(
                "validation_ratio must be within [0, 1], got {ratio}"
            )));
        }
        if self.generation.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size must be at least 1"));
        }
        if self.generation.pilot_mode && self.generation.pilot_size == 0 {
            return Err(ConfigError::invalid("pilot_size must be at least 1"));
        }
        if !self.relevance_cutoff.is_finite() {
            return Err(ConfigError::invalid("relevance_cutoff must be finite"));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::invalid("model must not be empty"));
        }

        let overlap = manual_overlap(&self.sampling.manual_train_ids, &self.sampling.manual_val_ids);
        if !overlap.is_empty() {
            return Err(ConfigError::ManualIdOverlap(overlap));
        }

        let catalog = self.catalog()?;
        catalog.resolve(&self.features_to_validate)?;
        catalog.resolve(&self.features_to_generate)?;
        for name in &self.sampling.features_to_label {
            name.parse::<FeatureKind>()?;
        }
        catalog.get(self.relevance_kind()?)?;
        Ok(())
    }

    pub fn catalog(&self) -> Result<FeatureCatalog, ConfigError> {
        FeatureCatalog::from_entries(&self.features)
    }

    pub fn relevance_kind(&self) -> Result<FeatureKind, ConfigError> {
        self.relevance_feature.parse()
    }

    /// Descriptors for the requested names, or for `default_names` when the
    /// caller did not narrow the selection.
    pub fn select_features(
        &self,
        requested: &[String],
        default_names: &[String],
    ) -> Result<Vec<FeatureDescriptor>, ConfigError> {
        let names = if requested.is_empty() {
            default_names
        } else {
            requested
        };
        self.catalog()?.resolve(names)
    }
}

/// Ids present in both manual lists, sorted.
pub fn manual_overlap(train_ids: &[String], val_ids: &[String]) -> Vec<String> {
    let train: BTreeSet<&str> = train_ids.iter().map(String::as_str).collect();
    val_ids
        .iter()
        .filter(|id| train.contains(id.as_str()))
        .map(|id| id.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_sample_size() -> usize {
    100
}

fn default_seed() -> u64 {
    123
}

fn default_validation_ratio() -> f64 {
    0.85
}

fn default_batch_size() -> usize {
    25
}

fn default_pilot_size() -> usize {
    10
}

fn default_pilot_seed() -> u64 {
    42
}

fn default_relevance_feature() -> String {
    FeatureKind::ContentRelevance.name().to_string()
}

fn default_relevance_cutoff() -> f64 {
    3.0
}

fn default_display_columns() -> Vec<String> {
    ["record_id", "post_title", "post_body", "comment_body", "text_content"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn all_feature_names() -> Vec<String> {
    FeatureKind::ALL
        .iter()
        .map(|k| k.name().to_string())
        .collect()
}

fn default_feature_entries() -> Vec<FeatureEntry> {
    FeatureCatalog::research_defaults()
        .iter()
        .map(|d| FeatureEntry {
            feature: d.kind.name().to_string(),
            validation_threshold: d.validation_threshold,
            cutoff: d.cutoff,
        })
        .collect()
}
