//! End-to-end behaviour of the transport against a scripted executor
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::{
    thread,
    time::{Duration, Instant},
};

use courier_common::{DataCategory, DiscardReason, DiscardRecord, Envelope, Item, ItemType};
use courier_delivery::{
    Clock, DeliveryResponse, ExecutorError, FlushResult, MockExecutor, TransportConfig,
    TransportError, TransportState,
};
use courier_spool::TestBackingStore;
use pretty_assertions::assert_eq;
use support::{Harness, WAIT, event, transaction};

#[test]
fn test_send_delivers_and_empties_queue() {
    let harness = Harness::new();

    let envelope = event("hello");
    let id = envelope.id;
    harness.transport.send(envelope).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert!(harness.queue.is_empty());
    assert_eq!(*harness.observer.delivered.lock(), vec![id]);
    assert!(harness.observer.states.lock().contains(&TransportState::Sending));
    assert_eq!(harness.transport.state(), TransportState::Idle);

    let request = &harness.executor.requests()[0];
    let sent = Envelope::from_bytes(&request.body).expect("decode");
    assert_eq!(sent.id, id);
    assert_eq!(sent.items.len(), 1);
}

#[test]
fn test_offline_sends_are_queued_then_drained() {
    let harness = Harness::new();
    harness.executor.go_offline();

    for n in 0..3 {
        harness.transport.send(event(&format!("offline {n}"))).expect("send");
    }
    harness.wait_idle();

    assert_eq!(harness.queue.len(), 3);
    assert_eq!(harness.executor.attempts(), 0);

    harness.executor.go_online();
    harness.transport.send(event("online")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 4);
    assert!(harness.queue.is_empty());
    assert_eq!(harness.observer.delivered.lock().len(), 4);
}

#[test]
fn test_backlog_is_sent_oldest_first() {
    let harness = Harness::new();
    harness.executor.go_offline();

    let first = event("first");
    let second = event("second");
    let (first_id, second_id) = (first.id, second.id);
    harness.transport.send(first).expect("send");
    harness.transport.send(second).expect("send");
    harness.wait_idle();

    harness.executor.go_online();
    harness.transport.connectivity_changed(true);
    harness.wait_idle();

    let sent: Vec<_> = harness
        .executor
        .requests()
        .iter()
        .map(|request| request.envelope_id)
        .collect();
    assert_eq!(sent, vec![first_id, second_id]);
}

#[test]
fn test_rate_limited_category_is_not_sent() {
    let harness = Harness::new();
    harness
        .executor
        .push_response(DeliveryResponse::ok().with_header("X-Sentry-Rate-Limits", "1:error"));

    harness.transport.send(event("allowed")).expect("send");
    harness.wait_idle();
    assert_eq!(harness.executor.attempts(), 1);

    harness.transport.send(event("blocked")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert!(harness.queue.is_empty());
    assert_eq!(
        *harness.observer.discarded.lock(),
        vec![DiscardRecord::new(
            DataCategory::Error,
            DiscardReason::RateLimitBackoff,
            1
        )]
    );

    harness.clock.advance(Duration::from_secs(2));
    harness.transport.send(event("allowed again")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 2);
    assert!(harness.queue.is_empty());
}

#[test]
fn test_rate_limit_strips_only_blocked_items() {
    let harness = Harness::new();
    harness.transport.rate_limiter().set(
        DataCategory::Attachment,
        harness.clock.now() + Duration::from_secs(60),
    );

    let mut envelope = event("with attachment");
    envelope.push(Item::new("attachment", "bytes").with_filename("log.txt"));
    harness.transport.send(envelope).expect("send");
    harness.wait_idle();

    let request = &harness.executor.requests()[0];
    let sent = Envelope::from_bytes(&request.body).expect("decode");
    assert_eq!(sent.items.len(), 1);
    assert_eq!(sent.items[0].item_type, ItemType::Event);
    assert_eq!(
        harness
            .transport
            .discard_recorder()
            .quantity(&DataCategory::Attachment, DiscardReason::RateLimitBackoff),
        1
    );
}

#[test]
fn test_too_many_requests_without_headers_blocks_everything() {
    let harness = Harness::new();
    harness.executor.push_response(DeliveryResponse::new(429));

    harness.transport.send(event("limited")).expect("send");
    harness.wait_idle();

    let limiter = harness.transport.rate_limiter();
    assert!(limiter.is_active(&DataCategory::Error));
    assert!(limiter.is_active(&DataCategory::Transaction));
    assert!(harness.queue.is_empty());
    assert_eq!(
        *harness.observer.discarded.lock(),
        vec![DiscardRecord::new(
            DataCategory::Error,
            DiscardReason::RateLimitBackoff,
            1
        )]
    );

    harness.clock.advance(Duration::from_secs(61));
    assert!(!limiter.is_active(&DataCategory::Error));
}

#[test]
fn test_unexpected_success_status_keeps_entry() {
    let harness = Harness::new();
    harness.executor.push_response(DeliveryResponse::new(201));

    harness.transport.send(event("created")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert_eq!(harness.queue.len(), 1);
    assert!(harness.observer.delivered.lock().is_empty());
    assert!(harness.observer.discarded.lock().is_empty());

    harness.transport.connectivity_changed(true);
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 2);
    assert!(harness.queue.is_empty());
}

#[test]
fn test_rejected_entry_is_dropped_and_backlog_continues() {
    let harness = Harness::new();
    harness.executor.go_offline();

    let rejected = event("rejected");
    let rejected_id = rejected.id;
    harness.transport.send(rejected).expect("send");
    harness.transport.send(event("good 1")).expect("send");
    harness.transport.send(event("good 2")).expect("send");
    harness.wait_idle();
    assert_eq!(harness.queue.len(), 3);

    harness.executor.go_online();
    harness.executor.push_response(DeliveryResponse::new(400));
    harness.transport.connectivity_changed(true);
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 3);
    assert_eq!(harness.executor.requests()[0].envelope_id, rejected_id);
    assert!(harness.queue.is_empty());
    assert_eq!(harness.observer.delivered.lock().len(), 2);
    assert!(!harness.observer.delivered.lock().contains(&rejected_id));
    assert_eq!(
        *harness.observer.discarded.lock(),
        vec![DiscardRecord::new(
            DataCategory::Error,
            DiscardReason::SendError,
            1
        )]
    );
}

#[test]
fn test_server_error_drops_entry() {
    let harness = Harness::new();
    harness.executor.push_response(DeliveryResponse::new(500));

    harness.transport.send(event("server error")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert!(harness.queue.is_empty());
    assert_eq!(
        harness
            .transport
            .discard_recorder()
            .quantity(&DataCategory::Error, DiscardReason::SendError),
        1
    );
}

#[test]
fn test_rate_limited_send_still_drains_backlog() {
    let harness = Harness::new();
    harness.executor.go_offline();
    harness.transport.send(event("cached")).expect("send");
    harness.wait_idle();

    harness.executor.go_online();
    harness.executor.push_response(
        DeliveryResponse::new(429).with_header("X-Sentry-Rate-Limits", "1:someCat:key"),
    );
    harness.transport.send(event("limited")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 2);
    assert!(harness.queue.is_empty());
    assert_eq!(harness.observer.delivered.lock().len(), 1);
}

#[test]
fn test_rate_limit_activated_during_drain_drops_backlog() {
    let harness = Harness::new();
    harness.executor.go_offline();
    for n in 0..3 {
        harness.transport.send(event(&format!("cached {n}"))).expect("send");
    }
    harness.wait_idle();

    harness.executor.go_online();
    harness.executor.push_response(DeliveryResponse::ok());
    harness.executor.push_response(
        DeliveryResponse::new(429).with_header("X-Sentry-Rate-Limits", "60::key"),
    );
    harness.transport.send(event("fresh")).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 2);
    assert!(harness.queue.is_empty());
    assert_eq!(harness.observer.delivered.lock().len(), 1);
    assert_eq!(
        harness
            .transport
            .discard_recorder()
            .quantity(&DataCategory::Error, DiscardReason::RateLimitBackoff),
        3
    );
}

#[test]
fn test_executor_error_keeps_entry_and_stops_drain() {
    let harness = Harness::new();
    harness.executor.go_offline();
    harness.transport.send(event("one")).expect("send");
    harness.transport.send(event("two")).expect("send");
    harness.wait_idle();

    harness.executor.go_online();
    harness
        .executor
        .push_error(ExecutorError::Connectivity("connection reset".to_string()));
    harness.transport.connectivity_changed(true);
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert_eq!(harness.queue.len(), 2);
}

#[test]
fn test_overflow_evicts_oldest() {
    let harness = Harness::builder().max_envelopes(3).build();
    harness.executor.go_offline();

    let oldest = event("oldest");
    let oldest_id = oldest.id;
    harness.transport.send(oldest).expect("send");
    for n in 0..3 {
        harness.transport.send(event(&format!("newer {n}"))).expect("send");
    }
    harness.wait_idle();

    assert_eq!(harness.queue.len(), 3);
    assert_eq!(
        *harness.observer.discarded.lock(),
        vec![DiscardRecord::new(
            DataCategory::Error,
            DiscardReason::QueueOverflow,
            1
        )]
    );

    let remaining: Vec<_> = harness
        .queue
        .list_all()
        .expect("list")
        .iter()
        .map(|id| harness.queue.read(id).expect("read").id)
        .collect();
    assert!(!remaining.contains(&oldest_id));
}

#[test]
fn test_entry_in_flight_is_never_evicted() {
    let executor = MockExecutor::new();
    executor.set_latency(Duration::from_millis(300));
    let harness = Harness::builder()
        .executor(executor)
        .max_envelopes(1)
        .build();

    harness.transport.send(event("in flight")).expect("send");

    let deadline = Instant::now() + WAIT;
    while harness.executor.attempts() == 0 {
        assert!(Instant::now() < deadline, "first attempt never started");
        thread::sleep(Duration::from_millis(1));
    }
    harness.transport.send(event("behind it")).expect("send");

    assert_eq!(harness.transport.flush(WAIT), FlushResult::Success);
    assert_eq!(harness.executor.attempts(), 2);
    assert_eq!(harness.observer.delivered.lock().len(), 2);
    assert!(harness.observer.discarded.lock().is_empty());
    assert!(harness.queue.is_empty());
}

#[test]
fn test_store_failure_drops_envelope() {
    let harness = Harness::new();
    harness.store.fail_writes(true);

    harness.transport.send(transaction(2)).expect("send");
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 0);
    let recorder = harness.transport.discard_recorder();
    assert_eq!(
        recorder.quantity(&DataCategory::Transaction, DiscardReason::CacheOverflow),
        1
    );
    assert_eq!(
        recorder.quantity(&DataCategory::Span, DiscardReason::CacheOverflow),
        3
    );
}

#[test]
fn test_unserializable_envelope_is_rejected() {
    let harness = Harness::new();

    let envelope = event("bad header").with_header(serde_json::json!(["not", "an", "object"]));
    let result = harness.transport.send(envelope);

    assert!(matches!(result, Err(TransportError::Serialization(_))));
    assert!(harness.queue.is_empty());
    assert_eq!(
        harness
            .transport
            .discard_recorder()
            .quantity(&DataCategory::Error, DiscardReason::SendError),
        1
    );
}

#[test]
fn test_client_report_rides_along_with_next_envelope() {
    let harness = Harness::builder()
        .config(TransportConfig::default())
        .build();
    harness.transport.rate_limiter().set(
        DataCategory::Transaction,
        harness.clock.now() + Duration::from_secs(60),
    );

    harness.transport.send(transaction(2)).expect("send");
    harness.transport.send(event("carrier")).expect("send");
    harness.wait_idle();

    assert!(harness.transport.discard_recorder().is_empty());

    let request = &harness.executor.requests()[0];
    let sent = Envelope::from_bytes(&request.body).expect("decode");
    let report = sent
        .items
        .iter()
        .find(|item| item.item_type == ItemType::ClientReport)
        .expect("client report");
    let report: serde_json::Value = serde_json::from_slice(&report.payload).expect("json");

    let discarded = report["discarded_events"].as_array().expect("array");
    assert_eq!(discarded.len(), 2);
    assert!(discarded.iter().any(|record| {
        record["category"] == "span"
            && record["reason"] == "ratelimit_backoff"
            && record["quantity"] == 3
    }));
}

#[test]
fn test_disabled_transport_drops_silently() {
    let harness = Harness::builder()
        .config(TransportConfig {
            enabled: false,
            ..TransportConfig::default()
        })
        .build();
    assert!(!harness.transport.config().enabled);

    harness.transport.send(event("ignored")).expect("send");
    harness.wait_idle();

    assert!(harness.queue.is_empty());
    assert_eq!(harness.executor.attempts(), 0);
    assert_eq!(harness.transport.flush(WAIT), FlushResult::Success);
}

#[test]
fn test_cached_envelopes_sent_on_start() {
    let store = TestBackingStore::new();
    store
        .insert_raw(&event("left over").to_bytes().expect("encode"))
        .expect("insert");

    let harness = Harness::builder().store(store).build();
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert!(harness.store.is_empty());
}

#[test]
fn test_cached_envelopes_wait_when_disabled_on_start() {
    let store = TestBackingStore::new();
    store
        .insert_raw(&event("left over").to_bytes().expect("encode"))
        .expect("insert");

    let harness = Harness::builder()
        .store(store)
        .config(TransportConfig {
            send_cached_on_start: false,
            send_client_reports: false,
            ..TransportConfig::default()
        })
        .build();
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 0);
    assert_eq!(harness.store.len(), 1);
}

#[test]
fn test_corrupt_entry_is_deleted_during_drain() {
    let store = TestBackingStore::new();
    store.insert_raw(b"not an envelope").expect("insert");
    store
        .insert_raw(&event("fine").to_bytes().expect("encode"))
        .expect("insert");

    let harness = Harness::builder().store(store).build();
    harness.wait_idle();

    assert_eq!(harness.executor.attempts(), 1);
    assert!(harness.store.is_empty());
}

#[test]
fn test_at_most_one_attempt_in_flight() {
    let executor = MockExecutor::new();
    executor.set_latency(Duration::from_millis(5));
    let harness = Harness::builder().executor(executor).build();

    thread::scope(|scope| {
        for t in 0..4 {
            let harness = &harness;
            scope.spawn(move || {
                for n in 0..5 {
                    harness
                        .transport
                        .send(event(&format!("thread {t} envelope {n}")))
                        .expect("send");
                }
            });
        }
    });

    assert_eq!(harness.transport.flush(WAIT), FlushResult::Success);
    assert_eq!(harness.executor.max_concurrent(), 1);
    assert_eq!(harness.executor.attempts(), 20);
    assert!(harness.queue.is_empty());
}

#[test]
fn test_flush_waits_for_delivery() {
    let executor = MockExecutor::new();
    executor.set_latency(Duration::from_millis(20));
    let harness = Harness::builder().executor(executor).build();

    for n in 0..3 {
        harness.transport.send(event(&format!("slow {n}"))).expect("send");
    }

    assert_eq!(harness.transport.flush(WAIT), FlushResult::Success);
    assert!(harness.queue.is_empty());
    assert_eq!(harness.executor.attempts(), 3);
}

#[test]
fn test_flush_times_out_while_offline() {
    let harness = Harness::new();
    harness.executor.go_offline();
    harness.transport.send(event("stuck")).expect("send");

    let started = Instant::now();
    let result = harness.transport.flush(Duration::from_millis(100));

    assert_eq!(result, FlushResult::TimedOut);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(harness.queue.len(), 1);
    assert!(!harness.transport.is_flushing());
}

#[test]
fn test_concurrent_flush_is_rejected() {
    let harness = Harness::new();
    harness.executor.go_offline();
    harness.transport.send(event("stuck")).expect("send");

    thread::scope(|scope| {
        let owner = scope.spawn(|| harness.transport.flush(Duration::from_millis(500)));

        let deadline = Instant::now() + WAIT;
        while !harness.transport.is_flushing() {
            assert!(Instant::now() < deadline, "flush never started");
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(
            harness.transport.flush(Duration::from_millis(10)),
            FlushResult::AlreadyFlushing
        );
        assert_eq!(owner.join().expect("join"), FlushResult::TimedOut);
    });
}

#[test]
fn test_flush_with_nothing_pending_succeeds_immediately() {
    let harness = Harness::new();
    assert_eq!(harness.transport.flush(Duration::ZERO), FlushResult::Success);
}

#[test]
fn test_shutdown_flushes_then_stops_worker() {
    let harness = Harness::new();
    harness.transport.send(event("last words")).expect("send");

    assert_eq!(harness.transport.shutdown(), FlushResult::Success);
    assert!(harness.queue.is_empty());

    // The worker is gone; new envelopes stay on disk.
    harness.transport.send(event("too late")).expect("send");
    assert_eq!(harness.queue.len(), 1);
}
