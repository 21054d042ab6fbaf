use std::sync::LazyLock;

use parking_lot::Mutex;

/// File extension used for queued envelopes
pub const EXTENSION: &str = "envelope";

static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

/// Locator of an envelope held in the disk queue
///
/// This is a ULID, so identifiers sort by creation time and double as the
/// on-disk filename. Identifiers created by one process are strictly
/// increasing, even within the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpooledEnvelopeId {
    id: ulid::Ulid,
}

impl SpooledEnvelopeId {
    /// Parse an identifier from a filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.envelope`
    ///
    /// # Security
    /// Rejects path separators, `..` and anything that is not a valid ULID,
    /// so a parsed identifier can always be joined onto the queue directory.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(EXTENSION)?.strip_suffix('.')?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new identifier, later than every identifier generated before it
    #[must_use]
    pub fn generate() -> Self {
        let id = GENERATOR
            .lock()
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());

        Self { id }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    #[must_use]
    pub fn filename(&self) -> String {
        format!("{}.{EXTENSION}", self.id)
    }

    /// Milliseconds since the Unix epoch at which this identifier was created
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl std::fmt::Display for SpooledEnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for SpooledEnvelopeId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ulid::Ulid::from_string(s).map(Self::new)
    }
}

impl serde::Serialize for SpooledEnvelopeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for SpooledEnvelopeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}
