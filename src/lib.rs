//! Durable, rate limited delivery of telemetry envelopes.
//!
//! Envelopes handed to a [`Client`] are gated by the collector's rate limits,
//! persisted to a bounded on-disk queue and delivered by a single background
//! worker. Anything that cannot be delivered right now stays queued until
//! the next attempt, flush or restart.

mod client;
pub mod config;

pub use client::{Client, ClientError};
pub use config::{ConfigError, CourierConfig};
pub use courier_common::{
    self as common, DataCategory, DiscardReason, DiscardRecord, Envelope, EnvelopeId, Item,
    ItemType, logging,
};
pub use courier_delivery::{
    self as delivery, Dsn, FlushResult, HttpExecutor, RateLimiter, Transport, TransportConfig,
};
pub use courier_spool::{self as spool, DiskQueue, SpoolConfig};
