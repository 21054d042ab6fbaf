//! Store-and-forward delivery orchestration

mod config;
mod worker;

use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

pub use config::TransportConfig;
use courier_common::{
    ClientReport, DiscardReason, DiscardRecord, DiscardRecorder, Envelope, internal,
};
use courier_spool::DiskQueue;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use worker::{Activity, Command, Shared, Worker};

use crate::{
    Clock, DeliveryObserver, FlushCoordinator, FlushResult, Flushable, NoopObserver,
    RateLimiter, RequestExecutor, SystemClock, TransportError,
};

const WORKER_THREAD_NAME: &str = "courier-transport";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    Idle,
    /// Attempting a freshly sent envelope
    Sending,
    /// Working through the queue backlog
    Draining,
}

/// Delivers envelopes to the collector, keeping them on disk until accepted
///
/// `send` may be called from any thread. All network work happens on one
/// dedicated worker thread, which runs its own single threaded Tokio runtime,
/// so the host application does not need to provide one.
#[derive(Debug)]
pub struct Transport {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    flush: FlushCoordinator,
}

pub struct TransportBuilder {
    executor: Arc<dyn RequestExecutor>,
    queue: Arc<DiskQueue>,
    config: TransportConfig,
    clock: Option<Arc<dyn Clock>>,
    observer: Arc<dyn DeliveryObserver>,
    rate_limiter: Option<Arc<RateLimiter>>,
    recorder: Option<Arc<DiscardRecorder>>,
}

impl TransportBuilder {
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for rate limit expiry. Ignored if a rate limiter is supplied.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    #[must_use]
    pub fn recorder(mut self, recorder: Arc<DiscardRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Start the worker thread.
    ///
    /// Envelopes older than the configured maximum age are purged first, then
    /// the queue is trimmed to its capacity. If
    /// `send_cached_on_start` is set, whatever is left in the queue is drained
    /// straight away.
    ///
    /// # Errors
    /// [`TransportError::WorkerUnavailable`] if the worker thread cannot be
    /// spawned
    pub fn build(self) -> Result<Transport, TransportError> {
        let rate_limiter = self.rate_limiter.unwrap_or_else(|| {
            Arc::new(RateLimiter::new(
                self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock)),
            ))
        });
        let clock = rate_limiter.clock().clone();

        let shared = Arc::new(Shared {
            config: self.config,
            queue: self.queue,
            rate_limiter,
            recorder: self.recorder.unwrap_or_default(),
            executor: self.executor,
            observer: self.observer,
            clock,
            activity: Activity::new(),
        });

        let expired = shared
            .queue
            .remove_expired(shared.clock.now(), shared.config.max_age());
        shared.discarded(expired);
        shared.discarded(shared.queue.enforce_capacity());

        let (commands, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = Worker::new(shared.clone());
        let handle = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(worker.run(receiver, shutdown_rx)),
                    Err(err) => {
                        internal!(level = ERROR, "Unable to start delivery runtime: {err}");
                    }
                }
            })
            .map_err(|err| TransportError::WorkerUnavailable(err.to_string()))?;

        let transport = Transport {
            shared,
            commands,
            shutdown,
            worker: Mutex::new(Some(handle)),
            flush: FlushCoordinator::new(),
        };

        if transport.shared.config.enabled
            && transport.shared.config.send_cached_on_start
            && !transport.shared.queue.is_empty()
        {
            internal!(level = INFO, "Sending envelopes cached by a previous run");
            transport.dispatch(Command::Drain);
        }

        Ok(transport)
    }
}

impl Transport {
    pub fn builder(executor: Arc<dyn RequestExecutor>, queue: Arc<DiskQueue>) -> TransportBuilder {
        TransportBuilder {
            executor,
            queue,
            config: TransportConfig::default(),
            clock: None,
            observer: Arc::new(NoopObserver),
            rate_limiter: None,
            recorder: None,
        }
    }

    /// Queue an envelope for delivery.
    ///
    /// Rate limited items are stripped (and counted) before anything touches
    /// the disk. The rest is persisted, then handed to the worker, which
    /// enforces the queue's capacity before attempting it. Delivery problems
    /// are never reported here.
    ///
    /// # Errors
    /// [`TransportError::Serialization`] if the envelope cannot be encoded. It
    /// is dropped and counted as `send_error`.
    pub fn send(&self, mut envelope: Envelope) -> Result<(), TransportError> {
        let shared = &self.shared;

        if !shared.config.enabled {
            internal!(level = TRACE, "Transport disabled, dropping envelope {}", envelope.id);
            return Ok(());
        }

        let limited = shared.rate_limiter.filter(&mut envelope);
        if !limited.is_empty() {
            shared.discarded(DiscardRecord::for_items(
                &limited,
                DiscardReason::RateLimitBackoff,
            ));
        }

        if envelope.is_empty() {
            internal!(
                level = DEBUG,
                "Envelope {} is entirely rate limited, not sending",
                envelope.id
            );
            return Ok(());
        }

        let report = self.attach_client_report(&mut envelope);

        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                shared.recorder.restore(report);
                shared.discarded(DiscardRecord::for_items(
                    &envelope.items,
                    DiscardReason::SendError,
                ));
                return Err(err.into());
            }
        };

        let id = match shared.queue.store_bytes(&bytes) {
            Ok(id) => id,
            Err(err) => {
                internal!(
                    level = ERROR,
                    "Unable to queue envelope {}, dropping it: {err}",
                    envelope.id
                );
                shared.recorder.restore(report);
                shared.discarded(DiscardRecord::for_items(
                    &envelope.items,
                    DiscardReason::CacheOverflow,
                ));
                return Ok(());
            }
        };

        self.dispatch(Command::Deliver(id));

        Ok(())
    }

    /// Move pending discard counts into a client report item, returning the
    /// records so they can be put back if the envelope never makes it to disk.
    fn attach_client_report(&self, envelope: &mut Envelope) -> Vec<DiscardRecord> {
        let shared = &self.shared;

        if !shared.config.send_client_reports {
            return Vec::new();
        }

        let records = shared.recorder.take();
        if records.is_empty() {
            return records;
        }

        match ClientReport::new(records.clone()).to_item() {
            Ok(item) => {
                envelope.push(item);
                records
            }
            Err(err) => {
                internal!(level = WARN, "Unable to build client report: {err}");
                shared.recorder.restore(records);
                Vec::new()
            }
        }
    }

    fn dispatch(&self, command: Command) {
        self.shared.activity.begin();

        if self.commands.send(command).is_err() {
            internal!(
                level = ERROR,
                "Delivery worker is gone, envelope stays queued"
            );
            self.shared.activity.finish();
        }
    }

    /// Tell the transport whether the collector is reachable. Regaining
    /// connectivity drains the queue.
    pub fn connectivity_changed(&self, reachable: bool) {
        if reachable {
            internal!(level = INFO, "Connectivity restored, draining queue");
            self.dispatch(Command::Drain);
        } else {
            internal!(level = INFO, "Connectivity lost");
        }
    }

    /// Block until everything queued has been delivered or `timeout` passes.
    ///
    /// Only one flush runs at a time; concurrent callers get
    /// [`FlushResult::AlreadyFlushing`] immediately.
    pub fn flush(&self, timeout: Duration) -> FlushResult {
        self.flush.flush(self, timeout)
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flush.is_flushing()
    }

    /// Wait for the worker to finish every dispatched command, regardless of
    /// whether the queue is empty afterwards.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now);
        self.shared
            .activity
            .wait_until(deadline, |pending| pending == 0)
    }

    /// Flush for the configured shutdown timeout, then stop the worker.
    pub fn shutdown(&self) -> FlushResult {
        let result = self.flush(self.shared.config.shutdown_timeout());

        let _ = self.shutdown.send(true);
        let worker = self.worker.lock().take();
        if let Some(handle) = worker
            && handle.join().is_err()
        {
            internal!(level = ERROR, "Delivery worker panicked");
        }

        internal!(level = DEBUG, "Transport shut down ({result:?})");
        result
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        self.shared.activity.state()
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<DiskQueue> {
        &self.shared.queue
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.rate_limiter
    }

    #[must_use]
    pub fn discard_recorder(&self) -> &Arc<DiscardRecorder> {
        &self.shared.recorder
    }

    #[must_use]
    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }
}

impl Flushable for Transport {
    fn is_drained(&self) -> bool {
        !self.shared.config.enabled
            || (self.shared.activity.pending() == 0 && self.shared.queue.is_empty())
    }

    fn request_drain(&self) {
        self.dispatch(Command::Drain);
    }

    fn wait_until_drained(&self, deadline: Instant) -> bool {
        let queue = &self.shared.queue;
        self.shared
            .activity
            .wait_until(deadline, |pending| pending == 0 && queue.is_empty())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // The worker exits on its own once it sees the signal; entries it
        // was working on stay queued.
        let _ = self.shutdown.send(true);
    }
}
