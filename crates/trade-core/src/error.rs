use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Stale data: {0}")]
    Stale(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdvisorError {
    #[error("Advisor unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed advisor response: {0}")]
    Malformed(String),

    #[error("Advisor timed out after {0}s")]
    Timeout(u64),
}

pub type DataResult<T> = Result<T, DataError>;
pub type AdvisorResult<T> = Result<T, AdvisorError>;
