//! Accounting for telemetry that was dropped before reaching the collector.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{DataCategory, Item, ItemType, SerializationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    BeforeSend,
    EventProcessor,
    SampleRate,
    NetworkError,
    QueueOverflow,
    CacheOverflow,
    #[serde(rename = "ratelimit_backoff")]
    RateLimitBackoff,
    InsufficientData,
    BufferOverflow,
    SendError,
}

impl DiscardReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeSend => "before_send",
            Self::EventProcessor => "event_processor",
            Self::SampleRate => "sample_rate",
            Self::NetworkError => "network_error",
            Self::QueueOverflow => "queue_overflow",
            Self::CacheOverflow => "cache_overflow",
            Self::RateLimitBackoff => "ratelimit_backoff",
            Self::InsufficientData => "insufficient_data",
            Self::BufferOverflow => "buffer_overflow",
            Self::SendError => "send_error",
        }
    }
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscardRecord {
    pub reason: DiscardReason,
    pub category: DataCategory,
    pub quantity: u64,
}

impl DiscardRecord {
    #[must_use]
    pub const fn new(category: DataCategory, reason: DiscardReason, quantity: u64) -> Self {
        Self {
            reason,
            category,
            quantity,
        }
    }

    /// Records for dropping `items`, one per category.
    ///
    /// Client reports are bookkeeping and never counted as lost. Dropped
    /// transactions additionally count their spans.
    #[must_use]
    pub fn for_items<'a>(
        items: impl IntoIterator<Item = &'a Item>,
        reason: DiscardReason,
    ) -> Vec<Self> {
        let mut counts: AHashMap<DataCategory, u64> = AHashMap::new();

        for item in items {
            if item.item_type == ItemType::ClientReport {
                continue;
            }

            *counts.entry(item.category()).or_default() += 1;

            let spans = item.span_count();
            if spans > 0 {
                *counts.entry(DataCategory::Span).or_default() += spans;
            }
        }

        let mut records: Vec<Self> = counts
            .into_iter()
            .map(|(category, quantity)| Self::new(category, reason, quantity))
            .collect();
        records.sort_by(|a, b| a.category.cmp(&b.category));
        records
    }
}

/// Thread safe tally of discarded telemetry, keyed by category and reason.
#[derive(Debug, Default)]
pub struct DiscardRecorder {
    counts: Mutex<AHashMap<(DataCategory, DiscardReason), u64>>,
}

impl DiscardRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, category: DataCategory, reason: DiscardReason, quantity: u64) {
        if quantity == 0 {
            return;
        }

        let mut counts = self.counts.lock();
        let entry = counts.entry((category, reason)).or_default();
        *entry = entry.saturating_add(quantity);
    }

    pub fn record_all<I>(&self, records: I)
    where
        I: IntoIterator<Item = DiscardRecord>,
    {
        let mut counts = self.counts.lock();
        for record in records {
            if record.quantity == 0 {
                continue;
            }
            let entry = counts.entry((record.category, record.reason)).or_default();
            *entry = entry.saturating_add(record.quantity);
        }
    }

    /// Count every item as discarded for `reason`, returning what was recorded.
    pub fn record_items<'a>(
        &self,
        items: impl IntoIterator<Item = &'a Item>,
        reason: DiscardReason,
    ) -> Vec<DiscardRecord> {
        let records = DiscardRecord::for_items(items, reason);
        self.record_all(records.iter().cloned());
        records
    }

    #[must_use]
    pub fn quantity(&self, category: &DataCategory, reason: DiscardReason) -> u64 {
        self.counts
            .lock()
            .get(&(category.clone(), reason))
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.lock().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<DiscardRecord> {
        Self::sorted(self.counts.lock().clone())
    }

    /// Drain every record, leaving the recorder empty.
    #[must_use]
    pub fn take(&self) -> Vec<DiscardRecord> {
        Self::sorted(std::mem::take(&mut *self.counts.lock()))
    }

    /// Put back records previously returned by [`DiscardRecorder::take`].
    pub fn restore(&self, records: Vec<DiscardRecord>) {
        self.record_all(records);
    }

    fn sorted(counts: AHashMap<(DataCategory, DiscardReason), u64>) -> Vec<DiscardRecord> {
        let mut records: Vec<DiscardRecord> = counts
            .into_iter()
            .map(|((category, reason), quantity)| DiscardRecord::new(category, reason, quantity))
            .collect();
        records.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.reason.cmp(&b.reason))
        });
        records
    }
}

/// Payload of a `client_report` item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientReport {
    pub timestamp: DateTime<Utc>,
    pub discarded_events: Vec<DiscardRecord>,
}

impl ClientReport {
    #[must_use]
    pub fn new(discarded_events: Vec<DiscardRecord>) -> Self {
        Self {
            timestamp: Utc::now(),
            discarded_events,
        }
    }

    /// # Errors
    ///
    /// Only fails if JSON serialisation itself fails.
    pub fn to_item(&self) -> Result<Item, SerializationError> {
        Ok(
            Item::new(ItemType::ClientReport, serde_json::to_vec(self)?)
                .with_content_type("application/json"),
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&DiscardReason::RateLimitBackoff).expect("json"),
            "\"ratelimit_backoff\""
        );
        assert_eq!(
            serde_json::to_string(&DiscardReason::QueueOverflow).expect("json"),
            "\"queue_overflow\""
        );
        assert_eq!(DiscardReason::CacheOverflow.to_string(), "cache_overflow");
    }

    #[test]
    fn test_records_aggregate_by_category() {
        let items = [
            Item::new(ItemType::Event, b"{}".to_vec()),
            Item::new(ItemType::Event, b"{}".to_vec()),
            Item::new(ItemType::Transaction, br#"{"spans":[{}]}"#.to_vec()),
            Item::new(ItemType::ClientReport, b"{}".to_vec()),
        ];

        let records = DiscardRecord::for_items(&items, DiscardReason::QueueOverflow);

        assert_eq!(
            records,
            vec![
                DiscardRecord::new(DataCategory::Error, DiscardReason::QueueOverflow, 2),
                DiscardRecord::new(DataCategory::Transaction, DiscardReason::QueueOverflow, 1),
                DiscardRecord::new(DataCategory::Span, DiscardReason::QueueOverflow, 2),
            ]
        );
    }

    #[test]
    fn test_recorder_take_empties() {
        let recorder = DiscardRecorder::new();
        recorder.record(DataCategory::Error, DiscardReason::SampleRate, 3);
        recorder.record(DataCategory::Error, DiscardReason::SampleRate, 2);
        recorder.record(DataCategory::Session, DiscardReason::SampleRate, 0);

        assert_eq!(recorder.quantity(&DataCategory::Error, DiscardReason::SampleRate), 5);

        let taken = recorder.take();
        assert_eq!(
            taken,
            vec![DiscardRecord::new(DataCategory::Error, DiscardReason::SampleRate, 5)]
        );
        assert!(recorder.is_empty());

        recorder.restore(taken);
        assert_eq!(recorder.quantity(&DataCategory::Error, DiscardReason::SampleRate), 5);
    }

    #[test]
    fn test_client_report_item() {
        let report = ClientReport::new(vec![DiscardRecord::new(
            DataCategory::Attachment,
            DiscardReason::RateLimitBackoff,
            1,
        )]);
        let item = report.to_item().expect("item");

        assert_eq!(item.item_type, ItemType::ClientReport);
        let value: serde_json::Value = serde_json::from_slice(&item.payload).expect("json");
        assert_eq!(value["discarded_events"][0]["reason"], "ratelimit_backoff");
        assert_eq!(value["discarded_events"][0]["category"], "attachment");
        assert_eq!(value["discarded_events"][0]["quantity"], 1);
    }
}
