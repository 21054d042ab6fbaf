//! The seam between the transport and the network.

pub mod mock;

use ahash::AHashMap;
use async_trait::async_trait;
use courier_common::EnvelopeId;
use courier_spool::SpooledEnvelopeId;

use crate::ExecutorError;

/// Response headers with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders(AHashMap<String, String>);

impl ResponseHeaders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for ResponseHeaders
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// One attempt at delivering an encoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Queue entry the body was read from
    pub entry: SpooledEnvelopeId,
    pub envelope_id: EnvelopeId,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
}

impl DeliveryResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: ResponseHeaders::new(),
        }
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(200)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Only a plain 200 counts as accepted.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == 200
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        self.status == 429
    }

    /// A client or server error status. The envelope will never be accepted
    /// as it is, so it is dropped rather than retried.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self.status, 400..=599)
    }
}

/// Performs delivery attempts on behalf of the transport
///
/// Only the transport's worker calls `execute`, one request at a time.
#[async_trait]
pub trait RequestExecutor: Send + Sync + std::fmt::Debug {
    /// Whether an attempt is worth making right now, e.g. the network is
    /// reachable. When this returns `false` queued envelopes stay on disk
    /// until the next drain.
    fn is_ready(&self) -> bool {
        true
    }

    /// Send the request and report what the collector answered.
    ///
    /// # Errors
    /// Any failure to obtain a response at all
    async fn execute(&self, request: DeliveryRequest) -> Result<DeliveryResponse, ExecutorError>;
}
