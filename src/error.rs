//! Crate-level error for stage runners and the CLI.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::gateway::ProviderError;
use crate::generation::GenerationError;
use crate::oracle::OracleError;
use crate::sampler::SampleError;
use crate::store::StoreError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sample(#[from] SampleError),
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl PipelineError {
    /// Missing stage inputs are configuration errors; everything else about
    /// the store passes through.
    pub fn from_required_input(err: StoreError) -> Self {
        match err {
            StoreError::Missing(path) => PipelineError::Config(ConfigError::MissingInput(path)),
            other => PipelineError::Store(other),
        }
    }
}
