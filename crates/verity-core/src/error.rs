//! Error types for verity

use thiserror::Error;

/// Result type alias using verity's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type shared by the verity crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Job payload could not be interpreted
    #[error("invalid job message: {0}")]
    InvalidMessage(String),

    /// A JSON schema could not be compiled
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error was caused by the job payload rather than the host
    pub fn is_payload_error(&self) -> bool {
        matches!(self, Error::InvalidMessage(_) | Error::Deserialization(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::Deserialization(err.to_string())
        } else {
            Error::Serialization(err.to_string())
        }
    }
}
