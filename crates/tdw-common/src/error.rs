//! Error types shared across TDW crates

use thiserror::Error;

/// Result type alias for TDW operations
pub type Result<T> = std::result::Result<T, TdwError>;

/// Main error type for TDW
#[derive(Error, Debug)]
pub enum TdwError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
