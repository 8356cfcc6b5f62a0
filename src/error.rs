//! Error types.
//!
//! [`LlmError`] covers the model transport. [`EngineError`] is the single
//! error a query or document operation can return; everything recoverable
//! (malformed model JSON, empty retrievals, retrieval misses) is handled
//! inside the orchestrator and never reaches the caller.

use thiserror::Error;

use crate::extract::ExtractError;

/// Failures talking to the language model.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model provider is disabled")]
    Disabled,

    #[error("API key not found in environment variable {var}")]
    MissingApiKey { var: String },

    #[error("model API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model request failed: {message}")]
    Transport { message: String },

    #[error("invalid model response: {message}")]
    InvalidResponse { message: String },
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport {
            message: e.to_string(),
        }
    }
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("language model call failed: {0}")]
    Transport(#[from] LlmError),

    #[error("daily model budget exceeded: spent ${spent:.4} of ${budget:.2}")]
    BudgetExceeded { spent: f64, budget: f64 },

    #[error("no document is attached to this session")]
    NoActiveDocument,

    #[error("document '{name}' contains no text")]
    EmptyDocument { name: String },

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Transport(_) => "model_error",
            EngineError::BudgetExceeded { .. } => "budget_exceeded",
            EngineError::NoActiveDocument => "no_active_document",
            EngineError::EmptyDocument { .. } => "empty_document",
            EngineError::Extraction(_) => "unsupported_document",
            EngineError::Storage(_) => "storage_error",
        }
    }
}
