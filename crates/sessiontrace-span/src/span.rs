//! Element span records: one per execution of one chain element.
//!
//! A span is created at the span-before hook, completed in place at the
//! span-after hook and then handed to the write queue by value. Its
//! topology (`parent_element_id`) is fixed at creation; only the inherited
//! [`SessionStamp`] may be rewritten afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::session::SessionStamp;
use crate::status::{ExecutionStatus, LoggingLevel};

/// Captured state of a message at one side of an element execution.
///
/// Every section is independently optional; the active verbosity tier
/// decides which sections survive (see [`PayloadSnapshot::filtered`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<BTreeMap<String, String>>,
}

impl PayloadSnapshot {
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value);
        self
    }

    pub fn with_context(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.context
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Length of the captured body in bytes, zero when absent.
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, |b| b.len())
    }

    /// Keep only the sections the tier retains.
    ///
    /// - `Off`: nothing.
    /// - `Info`: headers and properties.
    /// - `Error` / `Debug`: every section.
    ///
    /// The body is dropped whenever `capture_body` is false.
    pub fn filtered(self, level: LoggingLevel, capture_body: bool) -> Option<Self> {
        let mut snapshot = match level {
            LoggingLevel::Off => return None,
            LoggingLevel::Info => Self {
                body: None,
                headers: self.headers,
                properties: self.properties,
                context: None,
            },
            LoggingLevel::Error | LoggingLevel::Debug => self,
        };
        if !capture_body {
            snapshot.body = None;
        }
        Some(snapshot)
    }
}

/// Short description of the failure that ended an element execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionSummary {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ExceptionSummary {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            stack_trace: None,
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

/// How an element execution ended, as reported by the routing engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SpanOutcome {
    Success,
    Warning,
    Failure(ExceptionSummary),
}

impl SpanOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            SpanOutcome::Success => ExecutionStatus::CompletedNormally,
            SpanOutcome::Warning => ExecutionStatus::CompletedWithWarnings,
            SpanOutcome::Failure(_) => ExecutionStatus::CompletedWithErrors,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SpanOutcome::Failure(_))
    }
}

/// Static identity of the chain element being executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Logical step identity, stable across repeated executions.
    pub chain_element_id: String,
    pub element_name: String,
    pub type_tag: String,
    /// Set when the element belongs to a referenced sub-chain.
    #[serde(default)]
    pub actual_element_chain_id: Option<String>,
    /// Distinguishes concurrent occurrences (loop iteration, split branch).
    #[serde(default)]
    pub branch_key: Option<String>,
}

impl ElementDescriptor {
    pub fn new(
        chain_element_id: impl Into<String>,
        element_name: impl Into<String>,
        type_tag: impl Into<String>,
    ) -> Self {
        Self {
            chain_element_id: chain_element_id.into(),
            element_name: element_name.into(),
            type_tag: type_tag.into(),
            actual_element_chain_id: None,
            branch_key: None,
        }
    }

    pub fn in_branch(mut self, branch_key: impl Into<String>) -> Self {
        self.branch_key = Some(branch_key.into());
        self
    }

    pub fn in_sub_chain(mut self, chain_id: impl Into<String>) -> Self {
        self.actual_element_chain_id = Some(chain_id.into());
        self
    }

    /// Key under which this occurrence is recorded in the execution map.
    pub fn execution_key(&self) -> String {
        execution_key(&self.chain_element_id, self.branch_key.as_deref())
    }
}

/// Declared logical parent of a new span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentHint {
    pub chain_element_id: String,
    #[serde(default)]
    pub branch_key: Option<String>,
    /// The parent may have executed several overlapping times; resolve to
    /// the innermost still-open occurrence.
    #[serde(default)]
    pub has_intermediate_parents: bool,
}

impl ParentHint {
    pub fn new(chain_element_id: impl Into<String>) -> Self {
        Self {
            chain_element_id: chain_element_id.into(),
            branch_key: None,
            has_intermediate_parents: false,
        }
    }

    pub fn in_branch(mut self, branch_key: impl Into<String>) -> Self {
        self.branch_key = Some(branch_key.into());
        self
    }

    pub fn with_intermediate_parents(mut self) -> Self {
        self.has_intermediate_parents = true;
        self
    }

    pub fn execution_key(&self) -> String {
        execution_key(&self.chain_element_id, self.branch_key.as_deref())
    }
}

fn execution_key(chain_element_id: &str, branch_key: Option<&str>) -> String {
    match branch_key {
        Some(branch) => format!("{}#{}", chain_element_id, branch),
        None => chain_element_id.to_string(),
    }
}

/// Handle returned by the span-before hook and passed back at span-after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanRef {
    pub session_id: String,
    pub span_id: String,
}

/// One execution of one chain element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpan {
    pub id: String,
    pub session_id: String,
    pub chain_element_id: String,
    pub element_name: String,
    pub type_tag: String,
    /// Span id of the enclosing occurrence, not a chain-element id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_element_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_element_chain_id: Option<String>,
    pub started: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<PayloadSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<PayloadSnapshot>,
    pub execution_status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionSummary>,
    #[serde(flatten)]
    pub session: SessionStamp,
}

impl ElementSpan {
    /// Create an in-progress span.
    pub fn new(
        id: impl Into<String>,
        session_id: impl Into<String>,
        element: &ElementDescriptor,
        parent_element_id: Option<String>,
        started: DateTime<Utc>,
        session: SessionStamp,
    ) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            chain_element_id: element.chain_element_id.clone(),
            element_name: element.element_name.clone(),
            type_tag: element.type_tag.clone(),
            parent_element_id,
            actual_element_chain_id: element.actual_element_chain_id.clone(),
            started,
            finished: None,
            duration_ms: None,
            before: None,
            after: None,
            execution_status: ExecutionStatus::InProgress,
            exception: None,
            session,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.execution_status == ExecutionStatus::InProgress
    }

    /// Record the after-side snapshot and the outcome.
    pub fn complete(
        &mut self,
        after: Option<PayloadSnapshot>,
        outcome: SpanOutcome,
        finished_at: DateTime<Utc>,
    ) {
        self.execution_status = outcome.status();
        if let SpanOutcome::Failure(exception) = outcome {
            self.exception = Some(exception);
        }
        self.after = after;
        self.finished = Some(finished_at);
        self.duration_ms = Some(
            (finished_at - self.started)
                .num_milliseconds()
                .max(0) as u64,
        );
    }

    /// Mark a span that never completed. Terminal spans are left untouched.
    pub fn abandon(&mut self) {
        if self.is_in_progress() {
            self.execution_status = ExecutionStatus::CancelledOrUnknown;
        }
    }

    /// Overwrite the inherited session-level fields. Topology is untouched.
    pub fn stamp_session(&mut self, stamp: SessionStamp) {
        self.session = stamp;
    }

    /// Sum of before/after body lengths, used for backpressure accounting.
    pub fn estimated_bytes(&self) -> usize {
        self.before.as_ref().map_or(0, |s| s.body_len())
            + self.after.as_ref().map_or(0, |s| s.body_len())
    }
}
