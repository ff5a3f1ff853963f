//! SDK error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The server validated the payload and refused all of it
    #[error("trace rejected: {}", .errors.join("; "))]
    Rejected {
        trace_id: Option<String>,
        errors: Vec<String>,
    },

    #[error("trace '{trace_id}' was already delivered")]
    AlreadyFlushed { trace_id: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
