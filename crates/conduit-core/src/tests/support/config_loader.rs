//! Configuration loaders for bootstrap tests.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};

use conduit_config::{Config, QueueMode};

use crate::bootstrap::ConfigLoader;

/// Configuration selecting a manual queue so tests control execution.
#[must_use]
pub fn manual_config() -> Config {
    Config {
        queue_mode: QueueMode::Manual,
        queue_label: String::from("conduit-test"),
        drain_timeout_ms: 2_000,
        ..Config::default()
    }
}

/// Loader that fails by passing an unknown queue mode on the command line.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("conduit"),
            OsString::from("--queue-mode"),
            OsString::from("threaded"),
        ];
        Config::load_from_iter(args)
    }
}
