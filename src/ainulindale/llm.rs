//! LLM Provider Capability
//!
//! The engine does not ship provider adapters; it consumes the
//! [`LLMProvider`] trait. Implementations translate [`ChatRequest`] into
//! their vendor's wire format and report billing data back in the
//! response. Everything network-related (transport, streaming, API keys)
//! lives behind this seam.
//!
//! Provider failures are classified into [`ProviderErrorKind`]s. Rate
//! limits and transient network failures are retryable and handled by
//! [`chat_with_retry`] with exponential backoff; auth, context-length,
//! and content-filter failures fail the current step and are surfaced to
//! the user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Token accounting for one chat round-trip.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id, echoed back in the tool-result message.
    pub id: String,
    /// Namespaced tool name (e.g. `"filesystem_read_file"`).
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema forwarded with a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters: serde_json::Value,
}

/// One message of the conversation sent to the provider.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCallRequest>,
    },
    /// A tool result correlated to a prior assistant tool call.
    Tool {
        tool_call_id: String,
        content: String,
    },
}

/// A full chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Per-call deadline; timeouts surface as retryable network errors.
    pub timeout: Duration,
}

/// A provider response: text, tool calls, and billing data.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: TokenUsage,
    /// Total dollar cost reported by the provider for this call.
    pub cost: f64,
}

/// Semantic classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimit,
    Network,
    Auth,
    ContextLength,
    ContentFilter,
    Unknown,
}

/// A classified provider failure.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether the agent loop should retry this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::RateLimit | ProviderErrorKind::Network
        )
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ProviderErrorKind::RateLimit => "rate_limit",
            ProviderErrorKind::Network => "network",
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::ContextLength => "context_length",
            ProviderErrorKind::ContentFilter => "content_filter",
            ProviderErrorKind::Unknown => "unknown",
        };
        write!(f, "LLM provider error ({}): {}", kind, self.message)
    }
}

impl Error for ProviderError {}

/// Trait-driven abstraction over a concrete LLM vendor.
///
/// Implementations must be thread-safe (`Send + Sync`) so a provider can
/// back several agents at once. Billing data should be filled into
/// [`ChatResponse::usage`] and [`ChatResponse::cost`] whenever the vendor
/// reports it — the budget tracker depends on it.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Stable provider name, matched against `AgentEntity::provider`.
    fn name(&self) -> &str;

    /// Perform one chat completion.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

/// Issue a chat request, retrying retryable failures with exponential
/// backoff up to `max_attempts` total attempts.
///
/// Each attempt is bounded by `request.timeout`; a timeout counts as a
/// retryable network failure. Non-retryable failures are returned
/// immediately. Callers race this future against their cancellation
/// token — dropping it aborts the in-flight attempt.
pub async fn chat_with_retry(
    provider: &dyn LLMProvider,
    request: &ChatRequest,
    max_attempts: u32,
    base_backoff: Duration,
) -> Result<ChatResponse, ProviderError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(request.timeout, provider.chat(request.clone()))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                ProviderErrorKind::Network,
                format!("timed out after {:?}", request.timeout),
            )),
        };

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = base_backoff * 2u32.saturating_pow(attempt - 1);
                log::warn!(
                    "provider '{}': attempt {}/{} failed ({}); retrying in {:?}",
                    provider.name(),
                    attempt,
                    max_attempts,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> ChatRequest {
        ChatRequest {
            model: "test-model".to_string(),
            system: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            temperature: 0.0,
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    struct FlakyProvider {
        failures_before_success: u32,
        calls: AtomicU32,
        kind: ProviderErrorKind,
    }

    #[async_trait]
    impl LLMProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(ProviderError::new(self.kind, "induced failure"))
            } else {
                Ok(ChatResponse {
                    text: Some("ok".to_string()),
                    usage: TokenUsage::new(10, 5),
                    ..Default::default()
                })
            }
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_rate_limits() {
        let provider = FlakyProvider {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
            kind: ProviderErrorKind::RateLimit,
        };
        let response = chat_with_retry(&provider, &request(), 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(response.text.as_deref(), Some("ok"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_at_attempt_cap() {
        let provider = FlakyProvider {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
            kind: ProviderErrorKind::Network,
        };
        let err = chat_with_retry(&provider, &request(), 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_fail_fast() {
        let provider = FlakyProvider {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
            kind: ProviderErrorKind::Auth,
        };
        let err = chat_with_retry(&provider, &request(), 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Auth);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::new(ProviderErrorKind::RateLimit, "x").is_retryable());
        assert!(ProviderError::new(ProviderErrorKind::Network, "x").is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::Auth, "x").is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::ContextLength, "x").is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::ContentFilter, "x").is_retryable());
        assert!(!ProviderError::new(ProviderErrorKind::Unknown, "x").is_retryable());
    }

    #[test]
    fn test_usage_totals() {
        let usage = TokenUsage::new(100, 20);
        assert_eq!(usage.total_tokens, 120);
    }
}
