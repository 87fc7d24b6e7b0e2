#![forbid(unsafe_code)]

use thiserror::Error;

use crate::model::RepAddress;

/// HLS tree errors.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("Network error: {0}")]
    Net(#[from] arbor_net::NetError),

    #[error("Decryption error: {0}")]
    Drm(#[from] arbor_drm::DrmError),

    #[error("Manifest parsing error: {0}")]
    Parse(String),

    #[error("No segments parsed")]
    NoSegments,

    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No representation at {0:?}")]
    InvalidAddress(RepAddress),

    #[error("Representation has no source URL")]
    MissingSourceUrl,
}

pub type HlsResult<T> = Result<T, HlsError>;
