//! TDW Common Library
//!
//! Shared utilities and error handling for the trading data warehouse.
//!
//! # Overview
//!
//! This crate provides common functionality used across all TDW workspace members:
//!
//! - **Error Handling**: Shared error type and result alias
//! - **Checksums**: Content digests for row values
//! - **Logging**: Centralized `tracing` setup
//!
//! # Example
//!
//! ```no_run
//! use tdw_common::checksum::{digest_parts, ChecksumAlgorithm};
//!
//! let hash = digest_parts(["AAPL", "1.0"], "||", ChecksumAlgorithm::Sha256);
//! assert_eq!(hash.len(), 64);
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, TdwError};
