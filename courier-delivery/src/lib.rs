//! Store-and-forward delivery of envelopes to a remote collector.
//!
//! [`Transport`] gates envelopes through the [`RateLimiter`], persists them in
//! a [`courier_spool::DiskQueue`] and hands them to a single worker thread
//! which talks to the [`RequestExecutor`].

pub mod clock;
pub mod error;
pub mod executor;
pub mod flush;
pub mod http;
pub mod observer;
pub mod rate_limiter;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DsnError, ExecutorError, TransportError};
pub use executor::{
    DeliveryRequest, DeliveryResponse, RequestExecutor, ResponseHeaders, mock::MockExecutor,
};
pub use flush::{FlushCoordinator, FlushResult, Flushable};
pub use http::{Dsn, HttpExecutor};
pub use observer::{DeliveryObserver, NoopObserver};
pub use rate_limiter::RateLimiter;
pub use transport::{Transport, TransportBuilder, TransportConfig, TransportState};
