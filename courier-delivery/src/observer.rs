use courier_common::{DiscardRecord, EnvelopeId};

use crate::TransportState;

/// Callbacks from the transport
///
/// Every method has an empty default, so observers only implement what they
/// care about. Callbacks run on whichever thread made the change (a producer
/// thread for `send`, the worker thread otherwise) and must not block.
pub trait DeliveryObserver: Send + Sync + std::fmt::Debug {
    fn on_state_change(&self, _state: TransportState) {}

    /// The collector accepted the envelope.
    fn on_delivered(&self, _id: &EnvelopeId) {}

    /// Telemetry was dropped. Records are never empty.
    fn on_discarded(&self, _records: &[DiscardRecord]) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl DeliveryObserver for NoopObserver {}
