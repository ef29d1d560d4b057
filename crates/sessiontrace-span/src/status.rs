//! Closed status and verbosity enums.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a session or of a single element execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    InProgress,
    CompletedNormally,
    CompletedWithWarnings,
    CompletedWithErrors,
    CancelledOrUnknown,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::InProgress => "IN_PROGRESS",
            ExecutionStatus::CompletedNormally => "COMPLETED_NORMALLY",
            ExecutionStatus::CompletedWithWarnings => "COMPLETED_WITH_WARNINGS",
            ExecutionStatus::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            ExecutionStatus::CancelledOrUnknown => "CANCELLED_OR_UNKNOWN",
        }
    }

    /// Whether the execution has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::InProgress)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verbosity tier of a session.
///
/// Tiers are ordered: `Off < Error < Info < Debug`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoggingLevel {
    Off,
    Error,
    #[default]
    Info,
    Debug,
}

impl LoggingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggingLevel::Off => "OFF",
            LoggingLevel::Error => "ERROR",
            LoggingLevel::Info => "INFO",
            LoggingLevel::Debug => "DEBUG",
        }
    }
}

impl fmt::Display for LoggingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoggingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Ok(LoggingLevel::Off),
            "ERROR" => Ok(LoggingLevel::Error),
            "INFO" => Ok(LoggingLevel::Info),
            "DEBUG" => Ok(LoggingLevel::Debug),
            other => Err(format!("unknown logging level: {}", other)),
        }
    }
}
