//! Output formats for the telemetry subscriber installed by the dispatch
//! core.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Line format written to stderr by the global subscriber.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per event, with fields flattened to the top level.
    #[default]
    Json,
    /// Single-line text for terminals.
    Compact,
}

/// Error returned when text names no [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;
