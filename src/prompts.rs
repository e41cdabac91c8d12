//! Prompt templates for single-feature scoring calls.
//!
//! One template is shared by every feature kind; the kind supplies the scale
//! text and the JSON key the model must answer with.

use crate::feature::FeatureKind;
use crate::gateway::Message;
use crate::oracle::CalibrationExample;

// =============================================================================
// Rendered prompts
// =============================================================================

/// Rendered prompt ready for LLM.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(
        &self,
        kind: FeatureKind,
        content: &str,
        examples: &[CalibrationExample],
    ) -> PromptInstance {
        let examples_json = if examples.is_empty() {
            "[]".to_string()
        } else {
            serde_json::to_string_pretty(examples).unwrap_or_else(|_| "[]".to_string())
        };

        let user = self
            .user
            .replace("{feature}", kind.name())
            .replace("{scale}", scale_text(kind))
            .replace("{examples}", &escape_xml_chars(&examples_json))
            .replace("{content}", &escape_xml_chars(content.trim()));

        PromptInstance {
            template_slug: self.slug.to_string(),
            system: self.system.trim().to_string(),
            user: user.trim().to_string(),
        }
    }

    /// Fingerprint of the template text and every scale it can embed.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.slug.as_bytes());
        hasher.update(b"|");
        hasher.update(self.system.as_bytes());
        hasher.update(b"|");
        hasher.update(self.user.as_bytes());
        for kind in FeatureKind::ALL {
            hasher.update(b"|");
            hasher.update(scale_text(kind).as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

pub const SCORING_V1: PromptTemplate = PromptTemplate {
    slug: "feature_score_v1",
    system: r#"You are a political analyst and content classifier for an academic study of online discussion about the Gaza conflict. Your output must be a single JSON object based ONLY on the provided criteria."#,
    user: r#"Assign the feature <feature>{feature}</feature> to the text below.

Focus on the Comment Body. Use the Post Title and Post Body only as context. Do not let tone or brevity change the score unless the scale says so.

<scale>
{scale}
</scale>

The following reference samples come from expert human ratings. Treat them as the definitive standard for each value:
<reference_samples>
{examples}
</reference_samples>

<text>
{content}
</text>

Output a single JSON object with exactly one key, "{feature}". No reasoning or other text.
json:"#,
};

pub const DEFAULT_PROMPT: PromptTemplate = SCORING_V1;

fn scale_text(kind: FeatureKind) -> &'static str {
    match kind {
        FeatureKind::ContentRelevance => {
            "Integer 0-5. 5 directly about the Israel-Palestine/Gaza conflict; \
             4 clearly about it but brief or polemical; 3 related keywords without naming the conflict; \
             2 accidental mention; 1 off-topic abuse or outburst; 0 spam or unrelated."
        }
        FeatureKind::PoliticalStance => {
            "Integer 1-5. 1 strongly pro-Palestine; 2 mildly pro-Palestine; \
             3 neutral or balanced; 4 mildly pro-Israel; 5 strongly pro-Israel."
        }
        FeatureKind::ArgumentQuality => {
            "Integer 0-5. 0 no argument; 1 bare assertion; 2 opinion with a weak reason; \
             3 reasoned claim; 4 reasoned claim with evidence; 5 well-structured argument with evidence."
        }
        FeatureKind::Sentiment => {
            "Number from -1.0 (very negative) through 0.0 (neutral) to 1.0 (very positive)."
        }
        FeatureKind::DiscourseTone => {
            "One label: \"civil\", \"hostile\", \"sarcastic\", \"emotional\" or \"informative\"."
        }
        FeatureKind::DominantFrame => {
            "One label: \"humanitarian\", \"security\", \"legal\", \"historical\", \
             \"political\" or \"religious\"."
        }
    }
}

/// Stable fingerprint of a calibration set, for cache keys.
pub fn calibration_fingerprint(examples: &[CalibrationExample]) -> String {
    let json = serde_json::to_string(examples).unwrap_or_default();
    blake3::hash(json.as_bytes()).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================
