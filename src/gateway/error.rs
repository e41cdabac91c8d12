//! Transport errors from a scoring call.
//!
//! Upstream, every variant collapses into a per-record sentinel. The split
//! here only drives the retry decision and the usage log's error code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429 from the provider.
    #[error("rate limited by provider")]
    RateLimited { request_id: Option<String> },

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        /// Provider error code from the body, if it sent one.
        code: Option<String>,
        request_id: Option<String>,
    },

    /// A success status whose body is not a usable completion.
    #[error("unusable completion: {0}")]
    BadCompletion(String),

    #[error("prompt of {chars} chars exceeds the {limit} char limit")]
    PromptTooLarge { chars: usize, limit: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing API key or an unbuildable client.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn bad_completion(message: impl Into<String>) -> Self {
        Self::BadCompletion(message.into())
    }

    /// 429s, 5xx statuses, timeouts and connect failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::BadCompletion(_) | Self::PromptTooLarge { .. } | Self::Config(_) => false,
        }
    }

    /// Short code for the usage log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Status { status, .. } if *status >= 500 => "upstream_error",
            Self::Status { .. } => "rejected",
            Self::BadCompletion(_) => "bad_completion",
            Self::PromptTooLarge { .. } => "prompt_too_large",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::RateLimited { request_id } | Self::Status { request_id, .. } => {
                request_id.as_deref()
            }
            _ => None,
        }
    }
}
