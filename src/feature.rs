//! Feature kinds, descriptors and value coercion.
//!
//! Every scored feature is one of a closed set of kinds. The kind fixes the
//! value type (and therefore the coercion rule and sentinel) and the prompt
//! template; the per-run descriptor adds the acceptance threshold and the
//! optional binarization cutoff.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigError;
use crate::metrics::MetricKind;

/// Sentinel for ordinal values that could not be obtained.
pub const ORDINAL_SENTINEL: i64 = -1;
/// Sentinel for continuous values that could not be obtained.
pub const CONTINUOUS_SENTINEL: f64 = 0.0;
/// Sentinel for categorical values that could not be obtained.
pub const CATEGORICAL_SENTINEL: &str = "ERROR";

// Float answers outside this half-open range cannot truncate to an i64.
const ORDINAL_FLOAT_MIN: f64 = i64::MIN as f64;
const ORDINAL_FLOAT_MAX: f64 = i64::MAX as f64;

// =============================================================================
// Value types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Ordinal,
    Continuous,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("value is null")]
    Null,
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: ValueType,
        found: &'static str,
    },
    #[error("cannot parse {raw:?} as {expected}")]
    Unparseable { expected: ValueType, raw: String },
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Ordinal => "ordinal",
            ValueType::Continuous => "continuous",
            ValueType::Categorical => "categorical",
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl ValueType {
    /// Placeholder recorded when a value is missing or cannot be coerced.
    pub fn sentinel(&self) -> FeatureValue {
        match self {
            ValueType::Ordinal => FeatureValue::Ordinal(ORDINAL_SENTINEL),
            ValueType::Continuous => FeatureValue::Continuous(CONTINUOUS_SENTINEL),
            ValueType::Categorical => FeatureValue::Categorical(CATEGORICAL_SENTINEL.to_string()),
        }
    }

    /// Coerce a raw JSON scalar into a typed feature value.
    ///
    /// Ordinal accepts integers, floats inside the i64 range (truncated
    /// toward zero) and integer strings. Continuous accepts numbers and numeric strings.
    /// Categorical accepts strings and renders numbers and bools as text.
    pub fn coerce(&self, raw: &Value) -> Result<FeatureValue, CoercionError> {
        if raw.is_null() {
            return Err(CoercionError::Null);
        }
        let wrong_type = || CoercionError::WrongType {
            expected: *self,
            found: json_type_name(raw),
        };
        let unparseable = |s: &str| CoercionError::Unparseable {
            expected: *self,
            raw: s.to_string(),
        };

        match self {
            ValueType::Ordinal => match raw {
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Ok(FeatureValue::Ordinal(i))
                    } else {
                        match n.as_f64() {
                            Some(f) if (ORDINAL_FLOAT_MIN..ORDINAL_FLOAT_MAX).contains(&f) => {
                                Ok(FeatureValue::Ordinal(f.trunc() as i64))
                            }
                            _ => Err(unparseable(&n.to_string())),
                        }
                    }
                }
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(FeatureValue::Ordinal)
                    .map_err(|_| unparseable(s.as_str())),
                _ => Err(wrong_type()),
            },
            ValueType::Continuous => match raw {
                Value::Number(n) => n
                    .as_f64()
                    .filter(|f| f.is_finite())
                    .map(FeatureValue::Continuous)
                    .ok_or_else(|| unparseable(&n.to_string())),
                Value::String(s) => match s.trim().parse::<f64>() {
                    Ok(f) if f.is_finite() => Ok(FeatureValue::Continuous(f)),
                    _ => Err(unparseable(s.as_str())),
                },
                _ => Err(wrong_type()),
            },
            ValueType::Categorical => match raw {
                Value::String(s) => Ok(FeatureValue::Categorical(s.clone())),
                Value::Number(n) => Ok(FeatureValue::Categorical(n.to_string())),
                Value::Bool(b) => Ok(FeatureValue::Categorical(b.to_string())),
                _ => Err(wrong_type()),
            },
        }
    }

    pub fn coerce_or_sentinel(&self, raw: &Value) -> FeatureValue {
        self.coerce(raw).unwrap_or_else(|_| self.sentinel())
    }
}

// =============================================================================
// Values
// =============================================================================

/// A single scored (or human-labeled) feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Ordinal(i64),
    Continuous(f64),
    Categorical(String),
}

impl FeatureValue {
    /// Numeric view, for threshold comparisons. Categorical values have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Ordinal(v) => Some(*v as f64),
            FeatureValue::Continuous(v) => Some(*v),
            FeatureValue::Categorical(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Re-read a value under `value_type`.
    ///
    /// Untagged deserialization cannot tell `2` the ordinal from `2` the
    /// continuous score, so values loaded from disk are conformed to the
    /// feature's declared type.
    pub fn conform(self, value_type: ValueType) -> FeatureValue {
        match (value_type, self) {
            (ValueType::Ordinal, v @ FeatureValue::Ordinal(_)) => v,
            (ValueType::Continuous, v @ FeatureValue::Continuous(_)) => v,
            (ValueType::Categorical, v @ FeatureValue::Categorical(_)) => v,
            (vt, other) => vt.coerce_or_sentinel(&other.to_json()),
        }
    }

    pub fn is_sentinel_for(&self, value_type: ValueType) -> bool {
        *self == value_type.sentinel()
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Ordinal(v) => write!(f, "{v}"),
            FeatureValue::Continuous(v) => write!(f, "{v}"),
            FeatureValue::Categorical(v) => f.write_str(v),
        }
    }
}

// =============================================================================
// Feature kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Topical relevance, ordinal 0-5.
    #[serde(rename = "content_relevance_score")]
    ContentRelevance,
    /// Political stance, ordinal 1 (pro-Palestine) to 5 (pro-Israel).
    PoliticalStance,
    /// Argument quality, ordinal 0-5.
    #[serde(rename = "argument_quality_score")]
    ArgumentQuality,
    /// Sentiment, continuous -1.0 to 1.0.
    #[serde(rename = "sentiment_score")]
    Sentiment,
    /// Discourse tone, categorical.
    DiscourseTone,
    /// Dominant frame, categorical.
    DominantFrame,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 6] = [
        FeatureKind::ContentRelevance,
        FeatureKind::PoliticalStance,
        FeatureKind::ArgumentQuality,
        FeatureKind::Sentiment,
        FeatureKind::DiscourseTone,
        FeatureKind::DominantFrame,
    ];

    /// Column / JSON key name of the feature.
    pub fn name(&self) -> &'static str {
        match self {
            FeatureKind::ContentRelevance => "content_relevance_score",
            FeatureKind::PoliticalStance => "political_stance",
            FeatureKind::ArgumentQuality => "argument_quality_score",
            FeatureKind::Sentiment => "sentiment_score",
            FeatureKind::DiscourseTone => "discourse_tone",
            FeatureKind::DominantFrame => "dominant_frame",
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            FeatureKind::ContentRelevance
            | FeatureKind::PoliticalStance
            | FeatureKind::ArgumentQuality => ValueType::Ordinal,
            FeatureKind::Sentiment => ValueType::Continuous,
            FeatureKind::DiscourseTone | FeatureKind::DominantFrame => ValueType::Categorical,
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeatureKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureKind::ALL
            .into_iter()
            .find(|k| k.name() == s.trim())
            .ok_or_else(|| ConfigError::UnknownFeature(s.to_string()))
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Static per-run configuration of one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureDescriptor {
    pub kind: FeatureKind,
    pub value_type: ValueType,
    /// Acceptance bound for the feature's agreement metric.
    pub validation_threshold: f64,
    /// Ordinal binarization boundary (relevance-style features only).
    pub cutoff: Option<i64>,
}

impl FeatureDescriptor {
    pub fn new(kind: FeatureKind, validation_threshold: f64, cutoff: Option<i64>) -> Self {
        Self {
            kind,
            value_type: kind.value_type(),
            validation_threshold,
            cutoff,
        }
    }

    /// Metric checked against `validation_threshold`.
    pub fn metric(&self) -> MetricKind {
        MetricKind::for_value_type(self.value_type)
    }
}

/// Descriptor entry as written in the pipeline config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEntry {
    pub feature: String,
    pub validation_threshold: f64,
    #[serde(default)]
    pub cutoff: Option<i64>,
}

/// Exactly one descriptor per configured feature.
#[derive(Debug, Clone, Default)]
pub struct FeatureCatalog {
    descriptors: BTreeMap<FeatureKind, FeatureDescriptor>,
}

impl FeatureCatalog {
    pub fn from_entries(entries: &[FeatureEntry]) -> Result<Self, ConfigError> {
        let mut descriptors = BTreeMap::new();
        for entry in entries {
            let kind: FeatureKind = entry.feature.parse()?;
            let descriptor = FeatureDescriptor::new(kind, entry.validation_threshold, entry.cutoff);
            validate_descriptor(&descriptor)?;
            if descriptors.insert(kind, descriptor).is_some() {
                return Err(ConfigError::DuplicateDescriptor(kind.name().to_string()));
            }
        }
        Ok(Self { descriptors })
    }

    /// Thresholds and cutoffs used by the research setup.
    pub fn research_defaults() -> Self {
        let descriptors = [
            FeatureDescriptor::new(FeatureKind::ContentRelevance, 0.8, Some(3)),
            FeatureDescriptor::new(FeatureKind::PoliticalStance, 0.9, None),
            FeatureDescriptor::new(FeatureKind::ArgumentQuality, 0.9, None),
            FeatureDescriptor::new(FeatureKind::Sentiment, 0.25, None),
            FeatureDescriptor::new(FeatureKind::DiscourseTone, 0.8, None),
            FeatureDescriptor::new(FeatureKind::DominantFrame, 0.8, None),
        ]
        .into_iter()
        .map(|d| (d.kind, d))
        .collect();
        Self { descriptors }
    }

    pub fn get(&self, kind: FeatureKind) -> Result<&FeatureDescriptor, ConfigError> {
        self.descriptors
            .get(&kind)
            .ok_or_else(|| ConfigError::MissingDescriptor(kind.name().to_string()))
    }

    /// Resolve feature names to descriptors, failing on the first unknown or
    /// undescribed name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<FeatureDescriptor>, ConfigError> {
        names
            .iter()
            .map(|name| {
                let kind: FeatureKind = name.parse()?;
                self.get(kind).cloned()
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureDescriptor> {
        self.descriptors.values()
    }
}

fn validate_descriptor(d: &FeatureDescriptor) -> Result<(), ConfigError> {
    let name = d.kind.name();
    if !d.validation_threshold.is_finite() || d.validation_threshold < 0.0 {
        return Err(ConfigError::invalid(format!(
            "{name}: validation_threshold must be a finite non-negative number"
        )));
    }
    if d.metric().higher_is_better() && d.validation_threshold > 1.0 {
        return Err(ConfigError::invalid(format!(
            "{name}: accuracy threshold must be within [0, 1]"
        )));
    }
    if d.cutoff.is_some() && d.value_type != ValueType::Ordinal {
        return Err(ConfigError::invalid(format!(
            "{name}: cutoff is only meaningful for ordinal features"
        )));
    }
    Ok(())
}
