//! Engine-level error kinds.
//!
//! Each domain module defines its own error enum (the board, the work
//! queue, tool dispatch, the LLM provider seam). [`EngineError`] is the
//! cross-cutting shape the board runner and agent loop surface to callers:
//! it wraps the domain errors and adds the runner-only kinds.
//!
//! Tool-call failures are deliberately *not* fatal here — they are turned
//! into tool-result messages the LLM sees as data (see
//! [`crate::plugin::ToolError`] and the agent loop).

use crate::ainulindale::llm::ProviderError;
use crate::ainulindale::plugin::ToolError;
use std::error::Error;
use std::fmt;

/// Errors surfaced by the board runner and agent loop.
#[derive(Debug)]
pub enum EngineError {
    /// The board failed validation before start, or an actor could not be
    /// constructed. Fatal to `start`.
    InvalidBoard(String),

    /// A tool dispatch error that escaped the LLM-feedback path (e.g. a
    /// plugin `initialize` failure during start).
    Tool(ToolError),

    /// The LLM provider failed after retries were exhausted, or with a
    /// non-retryable error.
    Provider(ProviderError),

    /// A status-guarded transition (work item or task) was attempted from
    /// the wrong state.
    InvalidTransition(String),

    /// The persistence capability reported a failure.
    Store(String),

    /// The operation observed the board-level cancellation token.
    Cancelled,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidBoard(msg) => write!(f, "Invalid board state: {}", msg),
            EngineError::Tool(e) => write!(f, "{}", e),
            EngineError::Provider(e) => write!(f, "{}", e),
            EngineError::InvalidTransition(msg) => write!(f, "Invalid transition: {}", msg),
            EngineError::Store(msg) => write!(f, "Store error: {}", msg),
            EngineError::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl Error for EngineError {}

impl From<ToolError> for EngineError {
    fn from(e: ToolError) -> Self {
        EngineError::Tool(e)
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        EngineError::Provider(e)
    }
}
