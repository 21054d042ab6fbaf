//! Data categories used for rate limiting and discard accounting.

use std::fmt;

/// The category an envelope item is counted under.
///
/// Rate limits received from the collector may name categories this build
/// does not know about; those are kept verbatim in [`DataCategory::Unknown`]
/// rather than rejected, so a newer server can still limit them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataCategory {
    /// Matches every category. Only meaningful as a rate limit key.
    All,
    Default,
    Error,
    Session,
    Transaction,
    Attachment,
    Profile,
    ProfileChunk,
    Replay,
    MetricBucket,
    Span,
    LogItem,
    Feedback,
    Monitor,
    /// Client reports and other SDK bookkeeping.
    Internal,
    Unknown(String),
}

impl DataCategory {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "",
            Self::Default => "default",
            Self::Error => "error",
            Self::Session => "session",
            Self::Transaction => "transaction",
            Self::Attachment => "attachment",
            Self::Profile => "profile",
            Self::ProfileChunk => "profile_chunk",
            Self::Replay => "replay",
            Self::MetricBucket => "metric_bucket",
            Self::Span => "span",
            Self::LogItem => "log_item",
            Self::Feedback => "feedback",
            Self::Monitor => "monitor",
            Self::Internal => "internal",
            Self::Unknown(name) => name,
        }
    }

    /// Parse a category name as it appears in a rate limit header.
    ///
    /// The empty string is the wire spelling of [`DataCategory::All`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "" => Self::All,
            "default" => Self::Default,
            "error" => Self::Error,
            "session" => Self::Session,
            "transaction" => Self::Transaction,
            "attachment" => Self::Attachment,
            "profile" => Self::Profile,
            "profile_chunk" => Self::ProfileChunk,
            "replay" => Self::Replay,
            "metric_bucket" => Self::MetricBucket,
            "span" => Self::Span,
            "log_item" => Self::LogItem,
            "feedback" => Self::Feedback,
            "monitor" => Self::Monitor,
            "internal" => Self::Internal,
            other => Self::Unknown(other.to_string()),
        }
    }

    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<&str> for DataCategory {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl serde::Serialize for DataCategory {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for DataCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}
