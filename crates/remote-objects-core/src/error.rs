//! Error taxonomy shared by the bridge crates.

use thiserror::Error;

/// Wire format error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Value contains a cycle")]
    Cyclic,
}

/// Failure raised while evaluating an expression.
///
/// Reported to the caller as `{error: message}`; the session stays valid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Request-level failure. Nothing is mutated when one of these is returned.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Channel secret or uid mismatch (403).
    #[error("Unauthorized request: {0}")]
    Auth(String),
    /// Undecodable body or internal fault (500).
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<CodecError> for BridgeError {
    fn from(e: CodecError) -> Self {
        Self::Transport(e.to_string())
    }
}
