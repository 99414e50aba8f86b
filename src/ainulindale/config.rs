//! Engine tunables.
//!
//! One plain struct of knobs the board runner and agent loop consult.
//! Users construct it directly; no config-file parsing is involved.

use std::time::Duration;

/// Timeouts, retry policy, and loop bounds for a board run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-call deadline for LLM chat completions.
    pub llm_timeout: Duration,
    /// Per-call deadline for plugin executions.
    pub tool_timeout: Duration,
    /// Hard cap on tool-loop steps per task.
    pub max_tool_steps: u32,
    /// Total attempts for retryable LLM failures.
    pub llm_retry_attempts: u32,
    /// Base backoff for LLM retries (doubles per attempt).
    pub llm_retry_backoff: Duration,
    /// Debounce window for entity persistence saves.
    pub save_debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(30),
            max_tool_steps: 10,
            llm_retry_attempts: 3,
            llm_retry_backoff: Duration::from_millis(500),
            save_debounce: Duration::from_secs(1),
        }
    }
}
