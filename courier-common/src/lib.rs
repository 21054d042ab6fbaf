//! Shared types for the courier delivery pipeline.
//!
//! Producers build [`Envelope`]s out of [`Item`]s; every item belongs to a
//! [`DataCategory`] which is what rate limits and discard accounting are keyed
//! on.

pub mod category;
pub mod codec;
pub mod discard;
pub mod envelope;
pub mod logging;

pub use tracing;

pub use category::DataCategory;
pub use codec::SerializationError;
pub use discard::{ClientReport, DiscardReason, DiscardRecord, DiscardRecorder};
pub use envelope::{Envelope, EnvelopeId, Item, ItemType};
