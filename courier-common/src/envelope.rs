use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DataCategory, SerializationError, codec};

/// Identifier carried in the `event_id` field of an envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for EnvelopeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The `type` of an envelope item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemType {
    Event,
    Transaction,
    Attachment,
    Session,
    Sessions,
    Profile,
    ProfileChunk,
    ReplayVideo,
    Statsd,
    MetricMeta,
    Log,
    Feedback,
    UserReport,
    CheckIn,
    ClientReport,
    Span,
    Other(String),
}

impl ItemType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Event => "event",
            Self::Transaction => "transaction",
            Self::Attachment => "attachment",
            Self::Session => "session",
            Self::Sessions => "sessions",
            Self::Profile => "profile",
            Self::ProfileChunk => "profile_chunk",
            Self::ReplayVideo => "replay_video",
            Self::Statsd => "statsd",
            Self::MetricMeta => "metric_meta",
            Self::Log => "log",
            Self::Feedback => "feedback",
            Self::UserReport => "user_report",
            Self::CheckIn => "check_in",
            Self::ClientReport => "client_report",
            Self::Span => "span",
            Self::Other(name) => name,
        }
    }

    /// The category this item is rate limited and counted under.
    #[must_use]
    pub const fn category(&self) -> DataCategory {
        match self {
            Self::Event => DataCategory::Error,
            Self::Transaction => DataCategory::Transaction,
            Self::Attachment => DataCategory::Attachment,
            Self::Session | Self::Sessions => DataCategory::Session,
            Self::Profile => DataCategory::Profile,
            Self::ProfileChunk => DataCategory::ProfileChunk,
            Self::ReplayVideo => DataCategory::Replay,
            Self::Statsd | Self::MetricMeta => DataCategory::MetricBucket,
            Self::Log => DataCategory::LogItem,
            Self::Feedback => DataCategory::Feedback,
            Self::CheckIn => DataCategory::Monitor,
            Self::ClientReport => DataCategory::Internal,
            Self::Span => DataCategory::Span,
            Self::UserReport | Self::Other(_) => DataCategory::Default,
        }
    }
}

impl From<&str> for ItemType {
    fn from(value: &str) -> Self {
        match value {
            "event" => Self::Event,
            "transaction" => Self::Transaction,
            "attachment" => Self::Attachment,
            "session" => Self::Session,
            "sessions" => Self::Sessions,
            "profile" => Self::Profile,
            "profile_chunk" => Self::ProfileChunk,
            "replay_video" => Self::ReplayVideo,
            "statsd" => Self::Statsd,
            "metric_meta" => Self::MetricMeta,
            "log" => Self::Log,
            "feedback" => Self::Feedback,
            "user_report" => Self::UserReport,
            "check_in" => Self::CheckIn,
            "client_report" => Self::ClientReport,
            "span" => Self::Span,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ItemType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ItemType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

/// A single item inside an envelope. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub item_type: ItemType,
    pub payload: Vec<u8>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl Item {
    pub fn new(item_type: impl Into<ItemType>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            item_type: item_type.into(),
            payload: payload.into(),
            content_type: None,
            filename: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub const fn category(&self) -> DataCategory {
        self.item_type.category()
    }

    /// Number of spans this item accounts for.
    ///
    /// A transaction counts its child spans plus the root span. Payloads that
    /// are not valid JSON count as a single span.
    #[must_use]
    pub fn span_count(&self) -> u64 {
        if self.item_type != ItemType::Transaction {
            return 0;
        }

        let children = serde_json::from_slice::<serde_json::Value>(&self.payload)
            .ok()
            .and_then(|value| value.get("spans").and_then(|spans| spans.as_array().map(Vec::len)))
            .unwrap_or_default();

        u64::try_from(children).map_or(u64::MAX, |count| count.saturating_add(1))
    }
}

impl From<String> for ItemType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

/// A unit of telemetry handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: EnvelopeId,
    /// Free-form metadata. Must be a JSON object when encoded.
    pub header: serde_json::Value,
    pub items: Vec<Item>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            id: EnvelopeId::new(),
            header: serde_json::Value::Object(serde_json::Map::new()),
            items: Vec::new(),
        }
    }
}

impl Envelope {
    #[must_use]
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, header: serde_json::Value) -> Self {
        self.header = header;
        self
    }

    pub fn push(&mut self, item: Item) {
        self.items.push(item);
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Encode into the newline delimited wire format.
    ///
    /// # Errors
    ///
    /// Fails if the header is not a JSON object or uses the reserved
    /// `event_id` key.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        codec::encode(self)
    }

    /// Decode an envelope previously produced by [`Envelope::to_bytes`].
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, a missing `event_id`, or item lengths that do
    /// not match the available bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        codec::decode(bytes)
    }
}
