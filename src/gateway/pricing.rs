//! Model pricing registry.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Pricing information for a chat model.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    /// Cost per input token in nanodollars.
    pub input_nanos_per_token: i64,
    /// Cost per output token in nanodollars.
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
// GPT-4o: $2.50/1M input, $10.00/1M output
const GPT_4O: ModelPricing = ModelPricing::new(2_500, 10_000);
// GPT-5-mini: $0.25/1M input, $2.00/1M output
const GPT_5_MINI: ModelPricing = ModelPricing::new(250, 2_000);
// Claude 3.5 Haiku: $0.80/1M input, $4.00/1M output
const CLAUDE_35_HAIKU: ModelPricing = ModelPricing::new(800, 4_000);

fn registry() -> &'static HashMap<&'static str, ModelPricing> {
    static REGISTRY: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        HashMap::from([
            ("openai/gpt-4o-mini", GPT_4O_MINI),
            ("gpt-4o-mini", GPT_4O_MINI),
            ("openai/gpt-4o", GPT_4O),
            ("gpt-4o", GPT_4O),
            ("openai/gpt-5-mini", GPT_5_MINI),
            ("anthropic/claude-3-5-haiku", CLAUDE_35_HAIKU),
        ])
    })
}

/// Pricing for a model id, if known.
pub fn chat_pricing(model_id: &str) -> Option<ModelPricing> {
    registry().get(model_id).copied()
}

/// Cost of a chat call in nanodollars. Unknown models cost zero.
pub fn chat_cost(model_id: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    chat_pricing(model_id)
        .map(|p| p.calculate_cost(input_tokens, output_tokens))
        .unwrap_or(0)
}
