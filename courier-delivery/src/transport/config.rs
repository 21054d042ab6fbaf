use std::time::Duration;

use serde::Deserialize;

const fn default_enabled() -> bool {
    true
}

const fn default_send_client_reports() -> bool {
    true
}

const fn default_send_cached_on_start() -> bool {
    true
}

const fn default_max_age_secs() -> u64 {
    90 * 24 * 60 * 60 // 90 days
}

const fn default_shutdown_timeout_secs() -> u64 {
    2
}

const fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// When disabled, `send` accepts envelopes and silently drops them.
    ///
    /// Default: `true`
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Attach pending discard counts to outgoing envelopes as a client report.
    ///
    /// Default: `true`
    #[serde(default = "default_send_client_reports")]
    pub send_client_reports: bool,

    /// Drain envelopes left over from a previous run as soon as the transport
    /// starts.
    ///
    /// Default: `true`
    #[serde(default = "default_send_cached_on_start")]
    pub send_cached_on_start: bool,

    /// Queued envelopes older than this are deleted at start-up (in seconds).
    ///
    /// Default: 90 days
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// How long `shutdown` waits for the queue to drain (in seconds).
    ///
    /// Default: 2 seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Timeout for a single HTTP delivery attempt (in seconds).
    ///
    /// Default: 30 seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            send_client_reports: default_send_client_reports(),
            send_cached_on_start: default_send_cached_on_start(),
            max_age_secs: default_max_age_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl TransportConfig {
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
