//! Shared doubles and fixtures for the dispatch core test suites.

mod config_loader;
mod diagnostics;
#[path = "harness.rs"]
mod harness_fixture;
mod observations;
#[path = "world.rs"]
mod world_fixture;

pub use config_loader::{FailingConfigLoader, manual_config};
pub use diagnostics::{DiagnosticEvent, RecordingDiagnostics};
pub use harness_fixture::{Harness, SERVICE, harness};
pub use observations::{Observation, ObservationLog};
pub use world_fixture::{ConnectionWorld, world};
