//! Typed errors for the delivery pipeline.
//!
//! Only [`TransportError::Serialization`] ever reaches a caller of
//! [`crate::Transport::send`]; everything that goes wrong after an envelope
//! was queued is accounted for through discard records and the queue itself.

use courier_common::SerializationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The envelope could not be encoded and was dropped.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// The worker thread could not be started or has already stopped.
    #[error("Delivery worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// Failures of a single delivery attempt. All of them leave the envelope queued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// The collector could not be reached.
    #[error("Connection failed: {0}")]
    Connectivity(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The request failed after a connection was made.
    #[error("Request failed: {0}")]
    Request(String),
}

impl ExecutorError {
    /// Returns `true` if the failure is a reachability problem rather than a
    /// problem with this particular request.
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum DsnError {
    #[error("Invalid DSN: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unsupported DSN scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("DSN has no host")]
    MissingHost,

    #[error("DSN has no public key")]
    MissingPublicKey,

    #[error("DSN has no project id")]
    MissingProjectId,
}
