use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum DrmError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Cipher error: {0}")]
    Cipher(String),
}
