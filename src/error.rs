// Error types shared across the agent core

use thiserror::Error;

/// Failure kinds the control loop distinguishes between.
///
/// Most of these are recoverable from the loop's point of view: a stale
/// element or an invisible target fails one ACT and the loop continues,
/// while schema and budget failures terminate the session.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("schema validation failed: {0}")]
    Schema(String),

    #[error("stale element id '{0}': the scan that produced it has been replaced")]
    StaleElement(String),

    #[error("element '{0}' has no visible bounding box")]
    NotVisible(String),

    #[error("execution context destroyed by navigation")]
    NavigationContextDestroyed,

    #[error("action denied by guardrail: {0}")]
    GuardrailDenied(String),

    #[error("action requires user confirmation: {0}")]
    GuardrailNeedsConfirm(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("step budget exhausted after {0} steps")]
    BudgetExhausted(usize),

    #[error("oscillation detected: {0}")]
    OscillationDetected(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Schema(format!("JSON error: {}", err))
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        AgentError::Browser(err.to_string())
    }
}

impl From<crate::llm::LlmError> for AgentError {
    fn from(err: crate::llm::LlmError) -> Self {
        AgentError::LlmUnavailable(err.to_string())
    }
}
