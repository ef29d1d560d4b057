//! Session and element span records for integration-chain execution tracing.
//!
//! This crate holds the plain data shared by the tracing pipeline and the
//! routing engine that feeds it. Nothing here schedules, caches or persists;
//! see `sessiontrace-core` for that.
//!
//! # Record Hierarchy
//!
//! ```text
//! Session (one per processing run)
//!   └─ ElementSpan (one per execution of a chain element)
//!       └─ ElementSpan (nested step, parent_element_id = enclosing span id)
//! ```
//!
//! Every `ElementSpan` also carries a denormalized [`SessionStamp`] so a
//! single indexed document answers session-level queries.

pub mod queue;
pub mod session;
pub mod span;
pub mod status;

pub use queue::QueueElement;
pub use session::{Session, SessionStamp, SessionStart};
pub use span::{
    ElementDescriptor, ElementSpan, ExceptionSummary, ParentHint, PayloadSnapshot, SpanOutcome,
    SpanRef,
};
pub use status::{ExecutionStatus, LoggingLevel};
