use std::time::Duration;

use crate::logging::LogFormat;
use crate::queue::QueueMode;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default name given to the dispatch worker thread.
pub const DEFAULT_QUEUE_LABEL: &str = "conduit-dispatch";

/// Default upper bound for a configured drain, in milliseconds.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5_000;

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default dispatch queue mode.
#[must_use]
pub const fn default_queue_mode() -> QueueMode {
    QueueMode::Worker
}

/// Owned worker thread label used by serde.
#[must_use]
pub fn default_queue_label_string() -> String {
    DEFAULT_QUEUE_LABEL.to_owned()
}

/// Default drain timeout in milliseconds.
#[must_use]
pub const fn default_drain_timeout_ms() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_MS
}

/// Default drain timeout as a [`Duration`].
#[must_use]
pub const fn default_drain_timeout() -> Duration {
    Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS)
}
