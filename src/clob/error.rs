//! Typed errors for the trading API boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClobError {
    #[error("market not found: {0}")]
    NotFound(String),

    #[error("authentication required: {0}")]
    Auth(String),

    #[error("api error (status {status}): {msg}")]
    Api { status: u16, msg: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ClobError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ClobError::Malformed(msg.into())
    }
}
