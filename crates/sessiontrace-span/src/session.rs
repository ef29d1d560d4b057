//! Session records: one per processing run of a chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{ExecutionStatus, LoggingLevel};

/// Caller-supplied description of a run, passed to the session-start hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStart {
    pub session_id: String,
    pub chain_id: String,
    pub chain_name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub engine_address: Option<String>,
    #[serde(default)]
    pub snapshot_name: Option<String>,
    /// Set for nested or retried runs.
    #[serde(default)]
    pub parent_session_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl SessionStart {
    pub fn new(
        session_id: impl Into<String>,
        chain_id: impl Into<String>,
        chain_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            chain_id: chain_id.into(),
            chain_name: chain_name.into(),
            external_id: None,
            domain: None,
            engine_address: None,
            snapshot_name: None,
            parent_session_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_parent_session(mut self, parent_session_id: impl Into<String>) -> Self {
        self.parent_session_id = Some(parent_session_id.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }
}

/// An active or finished processing run.
///
/// A `Session` is only mutated while it is registered; once removed from
/// the registry it is never reopened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_address: Option<String>,
    pub chain_id: String,
    pub chain_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub execution_status: ExecutionStatus,
    pub logging_level: LoggingLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Sampling decision taken once at session start.
    pub sampled: bool,
}

impl Session {
    pub fn new(start: SessionStart, logging_level: LoggingLevel, sampled: bool) -> Self {
        Self {
            id: start.session_id,
            external_id: start.external_id,
            domain: start.domain,
            engine_address: start.engine_address,
            chain_id: start.chain_id,
            chain_name: start.chain_name,
            snapshot_name: start.snapshot_name,
            started: start.started_at,
            finished: None,
            duration_ms: None,
            execution_status: ExecutionStatus::InProgress,
            logging_level,
            parent_session_id: start.parent_session_id,
            correlation_id: None,
            sampled,
        }
    }

    /// Record the final outcome of the run.
    pub fn finish(&mut self, status: ExecutionStatus, finished_at: DateTime<Utc>, duration_ms: u64) {
        self.execution_status = status;
        self.finished = Some(finished_at);
        self.duration_ms = Some(duration_ms);
    }

    /// Session-level fields copied onto every span of this session.
    pub fn stamp(&self) -> SessionStamp {
        SessionStamp {
            external_session_id: self.external_id.clone(),
            chain_id: self.chain_id.clone(),
            chain_name: self.chain_name.clone(),
            domain: self.domain.clone(),
            engine_address: self.engine_address.clone(),
            snapshot_name: self.snapshot_name.clone(),
            session_started: self.started,
            session_finished: self.finished,
            session_duration_ms: self.duration_ms,
            session_status: self.execution_status,
            session_logging_level: self.logging_level,
            parent_session_id: self.parent_session_id.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Denormalized session fields carried by each span document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStamp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
    pub chain_id: String,
    pub chain_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
    pub session_started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration_ms: Option<u64>,
    pub session_status: ExecutionStatus,
    pub session_logging_level: LoggingLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
