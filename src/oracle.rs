//! Scoring oracle: text plus calibration examples in, one JSON value out.
//!
//! The oracle itself may fail in many ways. Callers never see those failures
//! as errors: [`score_record`] folds every outcome into an [`OracleOutcome`]
//! so the validator and the generator handle bad records identically.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::cache::{CachedScore, ScoreCache, ScoreCacheKey};
use crate::feature::{CoercionError, FeatureDescriptor, FeatureKind, FeatureValue};
use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};
use crate::prompts::{calibration_fingerprint, PromptTemplate, DEFAULT_PROMPT};

/// Sampling temperature for scoring calls.
pub const SCORING_TEMPERATURE: f32 = 0.1;

/// One human-labeled reference sample shown to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationExample {
    pub text: String,
    pub value: FeatureValue,
}

impl CalibrationExample {
    pub fn new(text: impl Into<String>, value: FeatureValue) -> Self {
        Self {
            text: text.into(),
            value,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(#[from] ProviderError),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Score `content` for `feature`. On success the result is the JSON object
    /// the model returned, expected to hold one key named after the feature.
    async fn score(
        &self,
        feature: FeatureKind,
        content: &str,
        examples: &[CalibrationExample],
    ) -> Result<Value, OracleError>;
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a record did not receive a real value.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Transport(String),
    Malformed(String),
    MissingKey,
    NullValue,
    Uncoercible(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(msg) => write!(f, "transport failure: {msg}"),
            FailureReason::Malformed(msg) => write!(f, "malformed response: {msg}"),
            FailureReason::MissingKey => f.write_str("response is missing the feature key"),
            FailureReason::NullValue => f.write_str("response value is null"),
            FailureReason::Uncoercible(msg) => write!(f, "uncoercible value: {msg}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleOutcome {
    Value(FeatureValue),
    Failure(FailureReason),
}

impl OracleOutcome {
    /// The coerced value, or the type sentinel for failures.
    pub fn value_or_sentinel(&self, descriptor: &FeatureDescriptor) -> FeatureValue {
        match self {
            OracleOutcome::Value(v) => v.clone(),
            OracleOutcome::Failure(_) => descriptor.value_type.sentinel(),
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            OracleOutcome::Value(_) => None,
            OracleOutcome::Failure(reason) => Some(reason),
        }
    }
}

/// Call the oracle for one record and fold the result into an outcome.
pub async fn score_record<O: ScoringOracle + ?Sized>(
    oracle: &O,
    descriptor: &FeatureDescriptor,
    content: &str,
    examples: &[CalibrationExample],
) -> OracleOutcome {
    let response = match oracle.score(descriptor.kind, content, examples).await {
        Ok(value) => value,
        Err(OracleError::Malformed(msg)) => {
            return OracleOutcome::Failure(FailureReason::Malformed(msg))
        }
        Err(err) => return OracleOutcome::Failure(FailureReason::Transport(err.to_string())),
    };
    interpret_response(descriptor, &response)
}

fn interpret_response(descriptor: &FeatureDescriptor, response: &Value) -> OracleOutcome {
    let Value::Object(map) = response else {
        return OracleOutcome::Failure(FailureReason::Malformed(format!(
            "expected a JSON object, got {response}"
        )));
    };
    let Some(raw) = map.get(descriptor.kind.name()) else {
        return OracleOutcome::Failure(FailureReason::MissingKey);
    };
    match descriptor.value_type.coerce(raw) {
        Ok(value) => OracleOutcome::Value(value),
        Err(CoercionError::Null) => OracleOutcome::Failure(FailureReason::NullValue),
        Err(err) => OracleOutcome::Failure(FailureReason::Uncoercible(err.to_string())),
    }
}

// =============================================================================
// LLM-backed oracle
// =============================================================================

/// Oracle backed by a chat-completions model in JSON mode.
pub struct LlmOracle {
    gateway: Arc<dyn ChatGateway>,
    model: String,
    template: PromptTemplate,
    cache: Option<Arc<dyn ScoreCache>>,
    run_id: Option<Uuid>,
}

impl LlmOracle {
    pub fn new(gateway: Arc<dyn ChatGateway>, model: impl Into<String>) -> Self {
        Self {
            gateway,
            model: model.into(),
            template: DEFAULT_PROMPT,
            cache: None,
            run_id: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ScoreCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn cached(&self, key: &ScoreCacheKey) -> Option<Value> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(hit)) => serde_json::from_str(&hit.response_json).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(feature = %key.feature, error = %err, "score cache read failed");
                None
            }
        }
    }
}

#[async_trait]
impl ScoringOracle for LlmOracle {
    async fn score(
        &self,
        feature: FeatureKind,
        content: &str,
        examples: &[CalibrationExample],
    ) -> Result<Value, OracleError> {
        let key = ScoreCacheKey::new(
            &self.model,
            feature.name(),
            &self.template.hash(),
            &calibration_fingerprint(examples),
            content,
        );
        if let Some(value) = self.cached(&key).await {
            return Ok(value);
        }

        let prompt = self.template.render(feature, content, examples);
        let mut attribution = Attribution::new("oracle::score").with_feature(feature.name());
        if let Some(run_id) = self.run_id {
            attribution = attribution.with_run(run_id);
        }
        let request = ChatRequest::new(
            ChatModel::openrouter(&self.model),
            prompt.to_messages(),
            attribution,
        )
        .temperature(SCORING_TEMPERATURE)
        .json();

        let response = self.gateway.chat(request).await?;
        let json_str = extract_json(&response.content)
            .ok_or_else(|| OracleError::Malformed(truncate(&response.content, 200)))?;
        let value: Value =
            serde_json::from_str(json_str).map_err(|e| OracleError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(OracleError::Malformed(format!("not an object: {json_str}")));
        }

        if let Some(cache) = &self.cache {
            let entry = CachedScore {
                response_json: json_str.to_string(),
                input_tokens: Some(response.input_tokens),
                output_tokens: Some(response.output_tokens),
                provider_cost_nanodollars: Some(response.cost_nanodollars),
            };
            if let Err(err) = cache.put(&key, &entry).await {
                warn!(feature = %feature, error = %err, "score cache write failed");
            }
        }
        Ok(value)
    }
}

/// First balanced `{...}` object in `raw`, ignoring braces inside strings.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let remainder = &raw[start..];
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in remainder.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&remainder[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, max_chars: usize) -> String {
    let mut out: String = s.chars().take(max_chars).collect();
    if s.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}
