use std::{sync::Arc, time::Duration};

use courier_common::{Envelope, internal};
use courier_delivery::{
    DeliveryObserver, DsnError, ExecutorError, FlushResult, HttpExecutor, RequestExecutor,
    Transport, TransportError,
};
use courier_spool::SpoolError;
use thiserror::Error;

use crate::CourierConfig;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No DSN configured")]
    MissingDsn,

    #[error(transparent)]
    Dsn(#[from] DsnError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Spool(#[from] SpoolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Owns a configured [`Transport`] and the queue behind it
#[derive(Debug)]
pub struct Client {
    transport: Transport,
}

impl Client {
    /// Build a client that delivers over HTTP to the configured DSN.
    ///
    /// # Errors
    /// - [`ClientError::MissingDsn`] if no DSN is configured
    /// - If the DSN is malformed, the queue cannot be opened, or the transport
    ///   cannot start
    pub fn from_config(config: CourierConfig) -> Result<Self, ClientError> {
        let dsn = config.dsn()?.ok_or(ClientError::MissingDsn)?;
        let executor = HttpExecutor::with_timeout(&dsn, config.transport.request_timeout())?;

        internal!(level = INFO, "Delivering envelopes to {}", executor.endpoint());

        Self::with_executor(config, Arc::new(executor), None)
    }

    /// Build a client around any executor. The DSN in `config` is ignored.
    ///
    /// # Errors
    /// If the queue cannot be opened or the transport cannot start
    pub fn with_executor(
        config: CourierConfig,
        executor: Arc<dyn RequestExecutor>,
        observer: Option<Arc<dyn DeliveryObserver>>,
    ) -> Result<Self, ClientError> {
        let queue = Arc::new(config.spool.into_queue()?);

        let mut builder = Transport::builder(executor, queue).config(config.transport);
        if let Some(observer) = observer {
            builder = builder.observer(observer);
        }

        Ok(Self {
            transport: builder.build()?,
        })
    }

    /// Queue an envelope for delivery.
    ///
    /// # Errors
    /// If the envelope cannot be serialised
    pub fn capture_envelope(&self, envelope: Envelope) -> Result<(), ClientError> {
        Ok(self.transport.send(envelope)?)
    }

    pub fn flush(&self, timeout: Duration) -> FlushResult {
        self.transport.flush(timeout)
    }

    /// Flush for the configured shutdown timeout, then stop delivering.
    pub fn close(&self) -> FlushResult {
        self.transport.shutdown()
    }

    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }
}
