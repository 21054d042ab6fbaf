use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DeliveryRequest, DeliveryResponse, RequestExecutor};
use crate::ExecutorError;

#[derive(Debug)]
struct MockState {
    script: Mutex<VecDeque<Result<DeliveryResponse, ExecutorError>>>,
    fallback: Mutex<Result<DeliveryResponse, ExecutorError>>,
    ready: AtomicBool,
    latency: Mutex<Duration>,
    requests: Mutex<Vec<DeliveryRequest>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(DeliveryResponse::ok())),
            ready: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            requests: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

/// Scripted executor for exercising the transport without a network
///
/// Scripted outcomes are consumed in order; once exhausted every attempt gets
/// the fallback outcome, which starts out as a plain 200. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<MockState>,
}

impl MockExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next unscripted attempt with `response`.
    pub fn push_response(&self, response: DeliveryResponse) {
        self.state.script.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, error: ExecutorError) {
        self.state.script.lock().push_back(Err(error));
    }

    /// Outcome for every attempt once the script runs out.
    pub fn respond_with(&self, outcome: Result<DeliveryResponse, ExecutorError>) {
        *self.state.fallback.lock() = outcome;
    }

    /// Simulate losing the network: the executor reports not ready.
    pub fn go_offline(&self) {
        self.state.ready.store(false, Ordering::SeqCst);
    }

    pub fn go_online(&self) {
        self.state.ready.store(true, Ordering::SeqCst);
    }

    /// Delay every attempt by `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock() = latency;
    }

    /// Number of `execute` calls so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<DeliveryRequest> {
        self.state.requests.lock().clone()
    }

    /// Highest number of attempts that were ever running at the same time.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for MockExecutor {
    fn is_ready(&self) -> bool {
        self.state.ready.load(Ordering::SeqCst)
    }

    async fn execute(&self, request: DeliveryRequest) -> Result<DeliveryResponse, ExecutorError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let latency = *self.state.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let outcome = self
            .state
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.state.fallback.lock().clone());

        self.state.requests.lock().push(request);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        outcome
    }
}
