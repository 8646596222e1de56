//! Shared configuration for the Conduit dispatch core.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then an optional
//! configuration file, then `CONDUIT_*` environment variables, then command
//! line flags such as `--log-filter` and `--queue-mode`.

mod defaults;
mod logging;
mod queue;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_DRAIN_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_QUEUE_LABEL, default_drain_timeout,
    default_drain_timeout_ms, default_log_filter, default_log_filter_string, default_log_format,
    default_queue_label_string, default_queue_mode,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use queue::{QueueMode, QueueModeParseError};

/// Resolved configuration for a dispatcher and its telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CONDUIT")]
pub struct Config {
    /// `tracing` filter expression, e.g. `info` or `conduit_core=debug`.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
    /// Execution mode of the dispatch queue.
    #[serde(default = "defaults::default_queue_mode")]
    pub queue_mode: QueueMode,
    /// Thread name used by the dispatch worker.
    #[serde(default = "defaults::default_queue_label_string")]
    pub queue_label: String,
    /// Upper bound for configured drains in milliseconds; `0` waits without
    /// a deadline.
    #[serde(default = "defaults::default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            queue_mode: default_queue_mode(),
            queue_label: default_queue_label_string(),
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl Config {
    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Dispatch queue execution mode.
    #[must_use]
    pub const fn queue_mode(&self) -> QueueMode {
        self.queue_mode
    }

    /// Worker thread label.
    #[must_use]
    pub fn queue_label(&self) -> &str {
        &self.queue_label
    }

    /// Drain deadline, or `None` when draining should wait for the snapshot
    /// without a deadline.
    #[must_use]
    pub const fn drain_timeout(&self) -> Option<Duration> {
        match self.drain_timeout_ms {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Json);
        assert_eq!(config.queue_mode(), QueueMode::Worker);
        assert_eq!(config.queue_label(), DEFAULT_QUEUE_LABEL);
        assert_eq!(config.drain_timeout(), Some(default_drain_timeout()));
    }

    #[rstest]
    fn zero_timeout_disables_deadline() {
        let config = Config {
            drain_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.drain_timeout(), None);
    }
}
