use thiserror::Error;

use crate::events::Topic;
use crate::types::IdentifierKey;

pub type CortexResult<T> = std::result::Result<T, CortexError>;

#[derive(Error, Debug)]
pub enum CortexError {
    /// External I/O failure (mirror, LLM, adapter upstream). Retried with
    /// capped exponential backoff; never fatal.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed incoming signal. The signal is dropped and audited.
    #[error("validation error: {0}")]
    Validation(String),

    /// An incoming identifier maps to a different entity. Triggers a merge.
    #[error("identifier {key}={value} already maps to a different entity")]
    DuplicateIdentifierConflict { key: IdentifierKey, value: String },

    /// No recognized deadline field parsed. Normal control flow.
    #[error("no recognized deadline field")]
    DeadlineParse,

    /// A bus publish could not acquire queue capacity within its deadline.
    #[error("publish to {topic} timed out under backpressure")]
    BackpressureTimeout { topic: Topic },

    /// Interrupted by cooperative shutdown; callers exit cleanly.
    #[error("operation cancelled by shutdown")]
    ShutdownCancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CortexError {
    /// Short kind tag used in `audit.log` records.
    pub fn kind(&self) -> &'static str {
        match self {
            CortexError::Transport(_) => "transport",
            CortexError::Validation(_) => "validation",
            CortexError::DuplicateIdentifierConflict { .. } => "duplicate_identifier_conflict",
            CortexError::DeadlineParse => "deadline_parse",
            CortexError::BackpressureTimeout { .. } => "backpressure_timeout",
            CortexError::ShutdownCancelled => "shutdown_cancelled",
            CortexError::Config(_) => "config",
            CortexError::Anyhow(_) => "internal",
        }
    }
}
