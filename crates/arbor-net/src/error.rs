use reqwest::Error as ReqwestError;
use thiserror::Error;
use url::Url;

pub type NetResult<T> = Result<T, NetError>;

/// Centralized error type for arbor-net
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Timeout")]
    Timeout,

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: Url },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<ReqwestError> for NetError {
    fn from(e: ReqwestError) -> Self {
        if e.is_timeout() {
            return Self::Timeout;
        }
        // Use alternate formatting {:#} to include the full error chain
        // (e.g. "error sending request … : connection refused")
        Self::Http(format!("{e:#}"))
    }
}
