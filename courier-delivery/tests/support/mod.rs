//! Shared fixtures for transport tests
#![allow(dead_code)] // Not every test file uses every helper

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use courier_common::{DiscardRecord, Envelope, EnvelopeId, Item};
use courier_delivery::{
    DeliveryObserver, ManualClock, MockExecutor, RateLimiter, Transport, TransportConfig,
    TransportState,
};
use courier_spool::{DiskQueue, TestBackingStore};
use parking_lot::Mutex;

pub const WAIT: Duration = Duration::from_secs(5);

/// Remembers every callback it receives
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<TransportState>>,
    pub delivered: Mutex<Vec<EnvelopeId>>,
    pub discarded: Mutex<Vec<DiscardRecord>>,
}

impl DeliveryObserver for RecordingObserver {
    fn on_state_change(&self, state: TransportState) {
        self.states.lock().push(state);
    }

    fn on_delivered(&self, envelope: &EnvelopeId) {
        self.delivered.lock().push(*envelope);
    }

    fn on_discarded(&self, records: &[DiscardRecord]) {
        self.discarded.lock().extend_from_slice(records);
    }
}

pub struct Harness {
    pub transport: Transport,
    pub executor: MockExecutor,
    pub store: TestBackingStore,
    pub queue: Arc<DiskQueue>,
    pub clock: Arc<ManualClock>,
    pub observer: Arc<RecordingObserver>,
}

pub struct HarnessBuilder {
    executor: MockExecutor,
    store: TestBackingStore,
    max_envelopes: usize,
    config: TransportConfig,
}

impl HarnessBuilder {
    pub fn executor(mut self, executor: MockExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn store(mut self, store: TestBackingStore) -> Self {
        self.store = store;
        self
    }

    pub const fn max_envelopes(mut self, max_envelopes: usize) -> Self {
        self.max_envelopes = max_envelopes;
        self
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Harness {
        let queue = Arc::new(DiskQueue::new(
            Arc::new(self.store.clone()),
            self.max_envelopes,
        ));
        let clock = Arc::new(ManualClock::new(SystemTime::now()));
        let observer = Arc::new(RecordingObserver::default());

        let transport = Transport::builder(Arc::new(self.executor.clone()), queue.clone())
            .config(self.config)
            .rate_limiter(Arc::new(RateLimiter::new(clock.clone())))
            .observer(observer.clone())
            .build()
            .expect("transport");

        Harness {
            transport,
            executor: self.executor,
            store: self.store,
            queue,
            clock,
            observer,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            executor: MockExecutor::new(),
            store: TestBackingStore::new(),
            max_envelopes: 30,
            config: TransportConfig {
                send_client_reports: false,
                ..TransportConfig::default()
            },
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn wait_idle(&self) {
        assert!(self.transport.wait_idle(WAIT), "transport never went idle");
    }
}

pub fn event(message: &str) -> Envelope {
    Envelope::new(vec![Item::new(
        "event",
        format!(r#"{{"message":"{message}"}}"#),
    )])
}

pub fn transaction(spans: usize) -> Envelope {
    let spans = vec![serde_json::json!({"op": "db"}); spans];
    Envelope::new(vec![Item::new(
        "transaction",
        serde_json::json!({ "spans": spans }).to_string(),
    )])
}
