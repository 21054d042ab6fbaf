//! Error types for the courier-spool crate.

use std::io;

use courier_common::SerializationError;
use thiserror::Error;

use crate::SpooledEnvelopeId;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The envelope could not be encoded for storage.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Envelope not found: {0}")]
    NotFound(SpooledEnvelopeId),

    /// Queue directory or configuration validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Internal error (lock poisoning, capacity of the memory store, etc.).
    #[error("Internal error: {0}")]
    Internal(String),

    /// A stored entry exists but can no longer be decoded.
    #[error("Corrupt envelope {id}: {source}")]
    Corrupt {
        id: SpooledEnvelopeId,
        source: SerializationError,
    },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    #[error("Spool path cannot contain '..' components: {0}")]
    ParentDirectory(String),

    #[error("Spool path must be absolute: {0}")]
    NotAbsolute(String),

    #[error("Spool path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: &'static str, path: String },

    #[error("Invalid spool configuration: {0}")]
    InvalidConfiguration(String),
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl SpoolError {
    /// Whether the error means the entry is already gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
