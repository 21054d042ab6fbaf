//! The single task that talks to the executor.
//!
//! Commands arrive over an unbounded channel and are handled strictly one at
//! a time, so there is never more than one delivery attempt or drain pass in
//! flight. Capacity eviction also happens here, between attempts, so an entry
//! is never evicted while it is being sent.

use std::{sync::Arc, time::Instant};

use courier_common::{
    DiscardReason, DiscardRecord, DiscardRecorder, incoming, internal, outgoing,
};
use courier_spool::{DiskQueue, SpoolError, SpooledEnvelopeId};
use parking_lot::{Condvar, Mutex};
use tokio::sync::{mpsc, watch};

use super::{TransportConfig, TransportState};
use crate::{
    Clock, DeliveryObserver, RateLimiter, RequestExecutor, executor::DeliveryRequest,
};

#[derive(Debug)]
pub(crate) enum Command {
    /// Enforce queue capacity, attempt this entry, then drain the backlog
    /// unless the attempt had to stop.
    Deliver(SpooledEnvelopeId),
    Drain,
}

#[derive(Debug)]
struct ActivityState {
    state: TransportState,
    /// Commands dispatched but not yet finished by the worker
    pending: usize,
}

/// Busy/idle bookkeeping shared by dispatchers, the worker and flush.
#[derive(Debug)]
pub(crate) struct Activity {
    inner: Mutex<ActivityState>,
    changed: Condvar,
}

impl Activity {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(ActivityState {
                state: TransportState::Idle,
                pending: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn begin(&self) {
        self.inner.lock().pending += 1;
    }

    /// Returns `true` if the state actually changed.
    fn set_state(&self, state: TransportState) -> bool {
        let mut inner = self.inner.lock();
        let changed = inner.state != state;
        inner.state = state;
        changed
    }

    /// Mark one command as done. Returns `true` if the worker went idle.
    pub(crate) fn finish(&self) -> bool {
        let went_idle = {
            let mut inner = self.inner.lock();
            inner.pending = inner.pending.saturating_sub(1);
            let idle = inner.pending == 0 && inner.state != TransportState::Idle;
            if inner.pending == 0 {
                inner.state = TransportState::Idle;
            }
            idle
        };

        self.changed.notify_all();
        went_idle
    }

    pub(crate) fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.lock().pending
    }

    /// Block until `done(pending)` holds or `deadline` passes.
    pub(crate) fn wait_until(&self, deadline: Instant, done: impl Fn(usize) -> bool) -> bool {
        let mut inner = self.inner.lock();
        loop {
            if done(inner.pending) {
                return true;
            }

            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return done(inner.pending);
            }
        }
    }
}

/// State shared between the transport handle and its worker.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: TransportConfig,
    pub(crate) queue: Arc<DiskQueue>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) recorder: Arc<DiscardRecorder>,
    pub(crate) executor: Arc<dyn RequestExecutor>,
    pub(crate) observer: Arc<dyn DeliveryObserver>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) activity: Activity,
}

impl Shared {
    /// Count discards and tell the observer about them.
    pub(crate) fn discarded(&self, records: Vec<DiscardRecord>) {
        if records.is_empty() {
            return;
        }

        self.observer.on_discarded(&records);
        self.recorder.record_all(records);
    }

    fn set_state(&self, state: TransportState) {
        if self.activity.set_state(state) {
            self.observer.on_state_change(state);
        }
    }

    fn finish(&self) {
        if self.activity.finish() {
            self.observer.on_state_change(TransportState::Idle);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Accepted by the collector and removed from the queue
    Delivered,
    /// Gone, dropped, rejected or deleted; the next entry may be tried
    Skipped,
    /// Nothing usable came back; stop for now
    Stop,
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        internal!(level = DEBUG, "Delivery worker started");

        loop {
            let command = tokio::select! {
                _ = shutdown.changed() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            // Entries are on disk before they are attempted, so abandoning an
            // attempt on shutdown loses nothing.
            let cancelled = tokio::select! {
                _ = shutdown.changed() => true,
                () = self.handle(command) => false,
            };

            self.shared.finish();

            if cancelled {
                break;
            }
        }

        internal!(level = DEBUG, "Delivery worker stopped");
    }

    async fn handle(&self, command: Command) {
        match command {
            Command::Deliver(id) => {
                self.shared.discarded(self.shared.queue.enforce_capacity());

                self.shared.set_state(TransportState::Sending);
                if self.attempt(&id).await != Attempt::Stop {
                    self.drain().await;
                }
            }
            Command::Drain => self.drain().await,
        }
    }

    /// Attempt every queued entry, oldest first, until an attempt has to stop.
    async fn drain(&self) {
        self.shared.set_state(TransportState::Draining);

        let ids = match self.shared.queue.list_all() {
            Ok(ids) => ids,
            Err(err) => {
                internal!(level = ERROR, "Unable to list envelope queue: {err}");
                return;
            }
        };

        if !ids.is_empty() {
            internal!(level = DEBUG, "Draining {} queued envelopes", ids.len());
        }

        for id in ids {
            if self.attempt(&id).await == Attempt::Stop {
                break;
            }
        }
    }

    async fn attempt(&self, id: &SpooledEnvelopeId) -> Attempt {
        let shared = &self.shared;

        if !shared.config.enabled {
            return Attempt::Stop;
        }

        if !shared.executor.is_ready() {
            internal!(level = DEBUG, "Executor not ready, leaving {id} queued");
            return Attempt::Stop;
        }

        let mut envelope = match shared.queue.read(id) {
            Ok(envelope) => envelope,
            Err(SpoolError::NotFound(_)) => return Attempt::Skipped,
            Err(SpoolError::Corrupt { source, .. }) => {
                internal!(level = WARN, "Deleting corrupt envelope {id}: {source}");
                self.remove(id);
                return Attempt::Skipped;
            }
            Err(err) => {
                internal!(level = ERROR, "Unable to read envelope {id}: {err}");
                return Attempt::Stop;
            }
        };

        let limited = shared.rate_limiter.filter(&mut envelope);
        if !limited.is_empty() {
            shared.discarded(DiscardRecord::for_items(
                &limited,
                DiscardReason::RateLimitBackoff,
            ));
        }

        if envelope.is_empty() {
            internal!(level = DEBUG, "Everything in {id} is rate limited, dropping");
            self.remove(id);
            return Attempt::Skipped;
        }

        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(err) => {
                internal!(level = ERROR, "Unable to encode envelope {id}: {err}");
                shared.discarded(DiscardRecord::for_items(
                    &envelope.items,
                    DiscardReason::SendError,
                ));
                self.remove(id);
                return Attempt::Skipped;
            }
        };

        outgoing!(level = DEBUG, "Sending envelope {} ({id})", envelope.id);

        let request = DeliveryRequest {
            entry: id.clone(),
            envelope_id: envelope.id,
            body,
        };

        let response = match shared.executor.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                incoming!(level = WARN, "Delivery of {id} failed: {err}");
                return Attempt::Stop;
            }
        };

        shared
            .rate_limiter
            .update_from_response(&response, shared.clock.now());

        if response.is_success() {
            incoming!(level = DEBUG, "Envelope {} accepted", envelope.id);
            self.remove(id);
            shared.observer.on_delivered(&envelope.id);
            return Attempt::Delivered;
        }

        if response.is_rejected() {
            let reason = if response.is_rate_limited() {
                DiscardReason::RateLimitBackoff
            } else {
                DiscardReason::SendError
            };

            incoming!(
                level = WARN,
                "Collector answered {} for envelope {}, dropping it",
                response.status,
                envelope.id
            );
            shared.discarded(DiscardRecord::for_items(&envelope.items, reason));
            self.remove(id);
            return Attempt::Skipped;
        }

        incoming!(
            level = WARN,
            "Collector answered {} for envelope {}, keeping it queued",
            response.status,
            envelope.id
        );
        Attempt::Stop
    }

    fn remove(&self, id: &SpooledEnvelopeId) {
        if let Err(err) = self.shared.queue.remove(id) {
            internal!(level = ERROR, "Unable to remove envelope {id}: {err}");
        }
    }
}
