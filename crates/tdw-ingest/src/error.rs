//! Error types for ingestion
//!
//! Every fatal condition aborts the current dataset and is returned to the
//! caller unchanged; nothing here retries or recovers.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Error type for the ingestion pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    /// Missing or malformed configuration, detected before any fetch
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP request failed, returned a non-success status, or returned a body
    /// that is not JSON
    #[error("Fetch error for {url} (page {page}): {message}")]
    Fetch {
        url: String,
        page: u32,
        message: String,
        /// Raw response text, kept for diagnosis
        body: Option<String>,
    },

    /// The sink could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// A dependency table was required but does not exist
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Sink execute/read/write failure
    #[error("Sink error: {0}")]
    Sink(String),

    /// A fetched value does not fit its schema column
    #[error("Cannot coerce value {value} in column '{column}' to {expected}")]
    Coercion {
        column: String,
        expected: String,
        value: String,
    },

    /// A pipeline stage was invoked out of order
    #[error("Pipeline state error: {0}")]
    State(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] tdw_common::TdwError),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a fetch error without a response body
    pub fn fetch(url: impl Into<String>, page: u32, message: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            page,
            message: message.into(),
            body: None,
        }
    }

    /// Create a fetch error that carries the raw response body
    pub fn fetch_with_body(
        url: impl Into<String>,
        page: u32,
        message: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            url: url.into(),
            page,
            message: message.into(),
            body: Some(body.into()),
        }
    }

    /// Create a sink error
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a coercion error
    pub fn coercion(
        column: impl Into<String>,
        expected: impl std::fmt::Display,
        value: &serde_json::Value,
    ) -> Self {
        Self::Coercion {
            column: column.into(),
            expected: expected.to_string(),
            value: value.to_string(),
        }
    }

    /// True for errors raised before any network or sink I/O took place
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Yaml(_))
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            },
            other => Self::Sink(other.to_string()),
        }
    }
}

impl From<::config::ConfigError> for IngestError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}
