//! Shared helpers for the integration tests: a scriptable LLM provider
//! and an event recorder.

#![allow(dead_code)]

use ainulindale::event_bus::{EngineEvent, EventSubscriber};
use ainulindale::llm::{
    ChatRequest, ChatResponse, LLMProvider, ProviderError, TokenUsage, ToolCallRequest,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An LLM provider that plays back a scripted response sequence, then a
/// fallback response forever.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<ChatResponse>>,
    fallback: ChatResponse,
    delay: Duration,
    pub calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: text_response("[TASK_COMPLETE] done", 0.0),
            delay: Duration::from_millis(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Queue one scripted response (builder pattern).
    pub fn then(self, response: ChatResponse) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
        self
    }

    /// Response returned once the script is exhausted (builder pattern).
    pub fn with_fallback(mut self, response: ChatResponse) -> Self {
        self.fallback = response;
        self
    }

    /// Sleep before each response, to widen cancellation windows.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        if self.delay > Duration::from_millis(0) {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        Ok(scripted.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// A plain-text response with the given cost.
pub fn text_response(text: &str, cost: f64) -> ChatResponse {
    ChatResponse {
        text: Some(text.to_string()),
        tool_calls: Vec::new(),
        usage: TokenUsage::new(100, 20),
        cost,
    }
}

/// A response requesting one tool call.
pub fn tool_call_response(tool_name: &str, arguments: JsonValue, cost: f64) -> ChatResponse {
    ChatResponse {
        text: None,
        tool_calls: vec![ToolCallRequest {
            id: format!("call-{}", tool_name),
            name: tool_name.to_string(),
            arguments,
        }],
        usage: TokenUsage::new(100, 20),
        cost,
    }
}

/// Records every event it sees, for ordering assertions.
pub struct EventRecorder {
    events: Mutex<Vec<EngineEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn kinds(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.kind().to_string())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().iter().filter(|k| k == &kind).count()
    }

    pub fn has(&self, kind: &str) -> bool {
        self.count(kind) > 0
    }

    /// Index of the first occurrence of a kind, if any.
    pub fn first_index(&self, kind: &str) -> Option<usize> {
        self.kinds().iter().position(|k| k == kind)
    }
}

#[async_trait]
impl EventSubscriber for EventRecorder {
    async fn on_event(&self, event: &EngineEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Poll `predicate` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until<F>(predicate: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
