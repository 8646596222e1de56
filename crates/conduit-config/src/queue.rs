//! Execution modes for the dispatch queue.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How queued handler invocations are executed.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum QueueMode {
    /// A dedicated worker thread runs jobs as soon as they are queued.
    #[default]
    Worker,
    /// Jobs run only when a host thread drains the queue.
    Manual,
}

/// Errors encountered while parsing a [`QueueMode`] from text.
pub type QueueModeParseError = strum::ParseError;
