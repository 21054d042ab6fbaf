//! Server-imposed backoff, per data category
//!
//! The collector communicates backoff in two ways:
//!
//! - `Retry-After`: delta seconds or an HTTP date, blocking every category
//! - `X-Sentry-Rate-Limits`: comma separated groups of
//!   `seconds:cat1;cat2:reason[:namespaces]`, where an empty category list
//!   blocks every category
//!
//! Each signal overwrites the expiry of the categories it names. Expired
//! entries are never removed eagerly, they simply stop matching.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::{DateTime, NaiveDateTime};
use courier_common::{DataCategory, Envelope, Item, internal};
use dashmap::DashMap;

use crate::{
    Clock, SystemClock,
    executor::{DeliveryResponse, ResponseHeaders},
};

pub const RETRY_AFTER: &str = "retry-after";
pub const RATE_LIMITS: &str = "x-sentry-rate-limits";

/// Applied when the collector answers 429 without saying for how long.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct RateLimiter {
    limits: DashMap<DataCategory, SystemTime>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            limits: DashMap::new(),
            clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether `category`, or every category, is blocked right now.
    #[must_use]
    pub fn is_active(&self, category: &DataCategory) -> bool {
        let now = self.clock.now();
        let blocks = |category: &DataCategory| {
            self.limits
                .get(category)
                .is_some_and(|until| *until > now)
        };

        blocks(&DataCategory::All) || blocks(category)
    }

    /// Block `category` until `until`, replacing any previous expiry.
    pub fn set(&self, category: DataCategory, until: SystemTime) {
        internal!(level = DEBUG, "Rate limiting {category} until {until:?}");
        self.limits.insert(category, until);
    }

    /// Apply both backoff headers, returning whether any limit was set.
    pub fn update(&self, headers: &ResponseHeaders, received_at: SystemTime) -> bool {
        let mut applied = false;

        if let Some(until) = headers
            .get(RETRY_AFTER)
            .and_then(|value| parse_retry_after(value, received_at))
        {
            self.set(DataCategory::All, until);
            applied = true;
        }

        if let Some(value) = headers.get(RATE_LIMITS) {
            for (category, until) in parse_rate_limits(value, received_at) {
                self.set(category, until);
                applied = true;
            }
        }

        applied
    }

    /// Apply the headers of a response. A 429 that carries no usable backoff
    /// blocks every category for [`DEFAULT_RETRY_AFTER`].
    pub fn update_from_response(&self, response: &DeliveryResponse, received_at: SystemTime) {
        if !self.update(&response.headers, received_at) && response.is_rate_limited() {
            self.set(DataCategory::All, received_at + DEFAULT_RETRY_AFTER);
        }
    }

    /// Unexpired limits, sorted by category.
    #[must_use]
    pub fn active_limits(&self) -> Vec<(DataCategory, SystemTime)> {
        let now = self.clock.now();
        let mut active: Vec<_> = self
            .limits
            .iter()
            .filter(|entry| *entry.value() > now)
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        active.sort();
        active
    }

    pub fn clear(&self) {
        self.limits.clear();
    }

    /// Strip every rate limited item from `envelope`, returning them.
    pub fn filter(&self, envelope: &mut Envelope) -> Vec<Item> {
        let (kept, limited): (Vec<Item>, Vec<Item>) = std::mem::take(&mut envelope.items)
            .into_iter()
            .partition(|item| !self.is_active(&item.category()));

        envelope.items = kept;

        if !limited.is_empty() {
            internal!(
                level = DEBUG,
                "Dropped {} rate limited items from envelope {}",
                limited.len(),
                envelope.id
            );
        }

        limited
    }
}

/// Parse a `Retry-After` value into the instant it expires.
///
/// Accepts delta seconds and the three HTTP date formats. Anything else
/// yields `None`.
#[must_use]
pub fn parse_retry_after(value: &str, received_at: SystemTime) -> Option<SystemTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(seconds) = value.parse::<u64>() {
        return received_at.checked_add(Duration::from_secs(seconds));
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.into());
    }

    // RFC 850 and asctime
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc().into())
}

/// Parse an `X-Sentry-Rate-Limits` value.
///
/// Malformed groups and groups with a non-positive delay are skipped.
/// `metric_bucket` limits only apply when they are not scoped to namespaces
/// other than `custom`.
#[must_use]
pub fn parse_rate_limits(value: &str, received_at: SystemTime) -> Vec<(DataCategory, SystemTime)> {
    let mut limits = Vec::new();

    for group in value.split(',') {
        let group: String = group.chars().filter(|c| !c.is_whitespace()).collect();
        let mut parts = group.split(':');

        let Some(seconds) = parts
            .next()
            .and_then(|seconds| seconds.parse::<i64>().ok())
            .and_then(|seconds| u64::try_from(seconds).ok())
            .filter(|seconds| *seconds > 0)
        else {
            continue;
        };

        let Some(until) = received_at.checked_add(Duration::from_secs(seconds)) else {
            continue;
        };

        let categories = parts.next().unwrap_or_default();
        let _reason = parts.next();
        let namespaces = parts.next().unwrap_or_default();

        if categories.is_empty() {
            limits.push((DataCategory::All, until));
            continue;
        }

        for name in categories.split(';').filter(|name| !name.is_empty()) {
            let category = DataCategory::parse(name);

            if category == DataCategory::MetricBucket
                && !namespaces.is_empty()
                && !namespaces.split(';').any(|namespace| namespace == "custom")
            {
                continue;
            }

            limits.push((category, until));
        }
    }

    limits
}
