// Ferrum Collector - Error types
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the collector service.

use thiserror::Error;

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Errors raised while wiring up or running the collector
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Invalid command line or environment settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the collection pipeline
    #[error(transparent)]
    Ferrum(#[from] ferrum::FerrumError),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Socket or file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ferrum::StorageError> for CollectorError {
    fn from(e: ferrum::StorageError) -> Self {
        CollectorError::Ferrum(e.into())
    }
}
