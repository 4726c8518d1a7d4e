//! Error types for artifact encoding and decoding.

use std::io;
use thiserror::Error;

/// Errors that can occur while reading or writing index artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// I/O error from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed header, short payload, bad token or undecodable record.
    #[error("Corrupt artifact: {0}")]
    Corruption(String),

    /// A structured record could not be serialized.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The bundle being written is internally inconsistent.
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),
}

/// Result type alias for artifact operations.
pub type Result<T> = std::result::Result<T, ArtifactError>;
