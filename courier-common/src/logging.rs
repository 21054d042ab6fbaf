use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer,
    filter::FilterFn,
    prelude::__tracing_subscriber_SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Envelopes leaving the process towards the collector
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Responses and signals coming back from the collector
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Environment variable consulted for the log level.
pub const LOG_LEVEL_VAR: &str = "COURIER_LOG";

fn level_from_env() -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    std::env::var(LOG_LEVEL_VAR).map_or(default, |level| parse_level(&level, default))
}

fn parse_level(level: &str, default: LevelFilter) -> LevelFilter {
    LevelFilter::from_str(level.trim()).unwrap_or_else(|_| {
        eprintln!("Invalid log level specified {level}, defaulting to {default}");
        default
    })
}

/// Install the global subscriber.
///
/// The level defaults to `TRACE` in debug builds and `INFO` otherwise, and can
/// be overridden with `COURIER_LOG`. Only events from `courier` targets are
/// shown, so the host application's own logging is left alone.
///
/// # Errors
///
/// Fails if the host has already installed a global subscriber.
pub fn try_init() -> Result<(), TryInitError> {
    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level_from_env())
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("courier")
                })),
        )
        .try_init()
}

/// Like [`try_init`], but keeps whatever subscriber is already installed.
pub fn init() {
    if let Err(err) = try_init() {
        eprintln!("Not installing courier log subscriber: {err}");
    }
}
