use thiserror::Error;
use trade_core::AdvisorError;

use crate::usage::BudgetInfo;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Daily token budget exceeded: {}/{} on {}", .0.total_tokens, .0.budget, .0.date)]
    BudgetExceeded(BudgetInfo),
}

pub type LlmResult<T> = Result<T, LlmError>;

impl LlmError {
    pub fn into_advisor_error(self, timeout_secs: u64) -> AdvisorError {
        match self {
            LlmError::RequestFailed(e) if e.is_timeout() => AdvisorError::Timeout(timeout_secs),
            LlmError::InvalidResponse(msg) => AdvisorError::Malformed(msg),
            LlmError::Serialization(e) => AdvisorError::Malformed(e.to_string()),
            other => AdvisorError::Unavailable(other.to_string()),
        }
    }
}
