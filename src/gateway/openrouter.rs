//! OpenRouter transport for scoring calls.
//!
//! Speaks the OpenAI-compatible `/chat/completions` wire format, so any
//! compatible base URL works.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::pricing::chat_cost;
use super::types::{ChatRequest, ChatResponse, FinishReason, Message};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Scoring answers are a single small JSON object; anything past 1MB is junk.
const MAX_BODY_BYTES: usize = 1_024 * 1_024;

/// A comment plus its post and calibration examples stays far below this.
const MAX_PROMPT_CHARS: usize = 500_000;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Connection settings for [`OpenRouterAdapter`].
#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as `HTTP-Referer` for OpenRouter's app attribution.
    pub referer: Option<String>,
    /// Sent as `X-Title`.
    pub app_title: Option<String>,
}

impl OpenRouterSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            referer: None,
            app_title: None,
        }
    }

    /// Reads `OPENROUTER_API_KEY` (required) and the optional
    /// `OPENROUTER_BASE_URL`, `OPENROUTER_TIMEOUT_SECONDS`,
    /// `OPENROUTER_REFERER` and `OPENROUTER_APP_TITLE`.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ProviderError::config("OPENROUTER_API_KEY not set"))?;
        let mut settings = Self::new(api_key);
        if let Ok(url) = std::env::var("OPENROUTER_BASE_URL") {
            settings.base_url = url;
        }
        if let Some(secs) = std::env::var("OPENROUTER_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            settings.timeout = Duration::from_secs(secs);
        }
        settings.referer = std::env::var("OPENROUTER_REFERER").ok();
        settings.app_title = std::env::var("OPENROUTER_APP_TITLE").ok();
        Ok(settings)
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn headers(&self) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| ProviderError::config("API key is not a valid header value"))?;
        headers.insert(AUTHORIZATION, auth);

        let optional = [("HTTP-Referer", &self.referer), ("X-Title", &self.app_title)];
        for (name, value) in optional {
            if let Some(v) = value.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(name, v);
            }
        }
        Ok(headers)
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenRouterAdapter {
    pub fn new(settings: OpenRouterSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .default_headers(settings.headers()?)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("cannot build HTTP client: {e}")))?;
        let endpoint = format!(
            "{}/chat/completions",
            settings.base_url.trim_end_matches('/')
        );
        Ok(Self { client, endpoint })
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(OpenRouterSettings::from_env()?)
    }
}

// =============================================================================
// WIRE FORMAT
// =============================================================================

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<JsonObjectFormat>,
}

#[derive(Serialize)]
struct JsonObjectFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize, Default)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    usage: Option<TokenUsage>,
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<AssistantMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TokenUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    cost_details: Option<CostDetails>,
}

#[derive(Deserialize)]
struct CostDetails {
    upstream_inference_cost: Option<f64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

impl ErrorBody {
    fn code_string(&self) -> Option<String> {
        self.code.as_ref().map(|code| match code {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_capped(mut response: reqwest::Response) -> Result<Vec<u8>, ProviderError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if bytes.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(ProviderError::bad_completion(format!(
                "body exceeds {MAX_BODY_BYTES} bytes"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn status_error(status: StatusCode, request_id: Option<String>, body: &[u8]) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited { request_id };
    }
    let error = serde_json::from_slice::<CompletionBody>(body)
        .ok()
        .and_then(|b| b.error);
    ProviderError::Status {
        status: status.as_u16(),
        message: error
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| status.to_string()),
        code: error.as_ref().and_then(ErrorBody::code_string),
        request_id,
    }
}

fn nanodollars(usd: f64) -> i64 {
    ((usd * 1_000_000_000.0).round() as i64).max(0)
}

#[async_trait]
impl ChatProvider for OpenRouterAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let chars: usize = req.messages.iter().map(|m| m.content.len()).sum();
        if chars > MAX_PROMPT_CHARS {
            return Err(ProviderError::PromptTooLarge {
                chars,
                limit: MAX_PROMPT_CHARS,
            });
        }

        let start = Instant::now();
        let model = req.model.model_id();
        let payload = CompletionRequest {
            model,
            messages: &req.messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req.json_mode.then_some(JsonObjectFormat {
                kind: "json_object",
            }),
        };

        let response = self.client.post(&self.endpoint).json(&payload).send().await?;
        let status = response.status();
        let request_id = request_id(response.headers());
        let body = read_capped(response).await?;

        if !status.is_success() {
            return Err(status_error(status, request_id, &body));
        }

        let parsed: CompletionBody = serde_json::from_slice(&body)
            .map_err(|e| ProviderError::bad_completion(format!("invalid JSON body: {e}")))?;
        // Some upstreams report failures inside a 200.
        if let Some(error) = parsed.error {
            return Err(ProviderError::Status {
                status: status.as_u16(),
                code: error.code_string(),
                message: error.message.unwrap_or_default(),
                request_id,
            });
        }
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::bad_completion("no choices"))?;
        let usage = parsed
            .usage
            .ok_or_else(|| ProviderError::bad_completion("missing usage"))?;

        Ok(ChatResponse {
            content: choice.message.and_then(|m| m.content).unwrap_or_default(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cost_nanodollars: chat_cost(model, usage.prompt_tokens, usage.completion_tokens),
            upstream_cost_nanodollars: usage
                .cost_details
                .and_then(|d| d.upstream_inference_cost)
                .map(nanodollars),
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}
