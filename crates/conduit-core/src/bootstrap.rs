//! Builds a ready-to-use dispatcher from layered configuration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::{error, info};

use conduit_config::Config;

use crate::diagnostics::{DISPATCH_TARGET, DiagnosticSink, StructuredDiagnostics};
use crate::dispatcher::Dispatcher;
use crate::pump::{DispatchQueue, PumpError};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::HostTransport;

/// Source of the configuration used by [`bootstrap_with`].
pub trait ConfigLoader: Send + Sync {
    /// Produces the resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when no valid configuration is available.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loads defaults, file, `CONDUIT_*` environment and command line layers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Hands out a fixed configuration, typically from tests or embedders that
/// resolve configuration themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced while bootstrapping.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The dispatch queue could not be created.
    #[error("failed to start dispatch queue: {source}")]
    Queue {
        /// Underlying queue error.
        #[source]
        source: PumpError,
    },
}

/// Dispatcher assembled from configuration, with the telemetry it installed.
#[derive(Debug)]
pub struct Runtime {
    config: Config,
    dispatcher: Dispatcher,
    telemetry: TelemetryHandle,
}

impl Runtime {
    /// Resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatcher bound to the configured queue.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Consumes the runtime, returning its dispatcher.
    #[must_use]
    pub fn into_dispatcher(self) -> Dispatcher {
        self.dispatcher
    }
}

/// Loads configuration, installs telemetry and builds a dispatcher over
/// `transport` reporting to tracing.
///
/// # Errors
///
/// Returns a [`BootstrapError`] naming the stage that failed.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    transport: impl HostTransport,
) -> Result<Runtime, BootstrapError> {
    bootstrap_with_diagnostics(loader, transport, StructuredDiagnostics::new())
}

/// Like [`bootstrap_with`] but routes diagnostics to `diagnostics`.
///
/// # Errors
///
/// Returns a [`BootstrapError`] naming the stage that failed.
pub fn bootstrap_with_diagnostics(
    loader: &dyn ConfigLoader,
    transport: impl HostTransport,
    diagnostics: impl DiagnosticSink,
) -> Result<Runtime, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;

    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;

    let queue = DispatchQueue::from_config(&config).map_err(|source| {
        error!(target: DISPATCH_TARGET, %source, "dispatch queue failed to start");
        BootstrapError::Queue { source }
    })?;

    let dispatcher = Dispatcher::builder(transport)
        .queue(queue)
        .diagnostics(diagnostics)
        .drain_timeout(config.drain_timeout())
        .build()
        .map_err(|source| BootstrapError::Queue { source })?;

    info!(
        target: DISPATCH_TARGET,
        queue_mode = %config.queue_mode(),
        queue_label = config.queue_label(),
        drain_timeout_ms = config.drain_timeout_ms,
        "dispatcher bootstrapped"
    );

    Ok(Runtime {
        config,
        dispatcher,
        telemetry,
    })
}
