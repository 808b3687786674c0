use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Structured reason a Candidate Query was refused by the guard.
///
/// These are surfaced verbatim to callers as reason codes and are never
/// retried automatically: re-submitting an unchanged unsafe query cannot
/// succeed.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("unsafe operation: {detail}")]
    UnsafeOperation { detail: String },

    #[error("unknown column: {name}")]
    UnknownColumn { name: String },

    #[error("unsupported aggregation: {function}")]
    UnsupportedAggregation { function: String },

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },
}

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("translation unavailable: {0}")]
    TranslationUnavailable(String),

    #[error("query rejected: {0}")]
    Rejected(RejectionReason),

    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("invalid pivot configuration: {0}")]
    PivotConfig(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

impl From<RejectionReason> for InsightError {
    fn from(reason: RejectionReason) -> Self {
        InsightError::Rejected(reason)
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
