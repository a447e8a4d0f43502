use std::fmt;

/// Error type for request parsing failure
#[derive(Debug, Default, Copy, Clone)]
pub struct BadRequest;

impl fmt::Display for BadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Request object is not cloneable. Are you passing a streaming body?")
    }
}

impl std::error::Error for BadRequest {}

/// Error type for the rate limiter Reqwest implementation.
#[derive(Debug)]
pub enum ReqwestError {
    /// Reqwest client error
    Reqwest(reqwest::Error),
    /// Rate limiter operation failed
    RateLimiter(String),
    /// Request parsing failed
    BadRequest(BadRequest),
    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for ReqwestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReqwestError::Reqwest(e) => write!(f, "Reqwest error: {e}"),
            ReqwestError::RateLimiter(msg) => {
                write!(f, "Rate limiter error: {msg}")
            }
            ReqwestError::BadRequest(e) => write!(f, "Request error: {e}"),
            ReqwestError::Other(e) => write!(f, "Other error: {e}"),
        }
    }
}

impl std::error::Error for ReqwestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReqwestError::Reqwest(e) => Some(e),
            ReqwestError::RateLimiter(_) => None,
            ReqwestError::BadRequest(e) => Some(e),
            ReqwestError::Other(e) => Some(e.as_ref()),
        }
    }
}

impl From<reqwest::Error> for ReqwestError {
    fn from(error: reqwest::Error) -> Self {
        ReqwestError::Reqwest(error)
    }
}

impl From<BadRequest> for ReqwestError {
    fn from(error: BadRequest) -> Self {
        ReqwestError::BadRequest(error)
    }
}
