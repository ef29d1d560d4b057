//! Session registry
//!
//! Owns every per-session structure: the session record behind its
//! reader/writer lock, the full and single-slot span caches, and the
//! execution map used for parent resolution. Producers hold the read side
//! of a session's lock while they touch its caches; finalize holds the
//! write side. Registration is checked under that lock, so once
//! [`SessionRegistry::clear`] has run no producer can re-populate the
//! caches of a finished session.

use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use sessiontrace_span::{ElementSpan, ParentHint, Session};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::{ElementSpanCache, SingleElementCache};
use crate::resolve::{resolve_parent, ExecutionMap};

/// A registered session and its lock.
#[derive(Debug)]
pub struct SessionEntry {
    lock: RwLock<Session>,
    failure_seen: AtomicBool,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            lock: RwLock::new(session),
            failure_seen: AtomicBool::new(false),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.lock.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.lock.write()
    }

    /// Whether a failed span has already switched this session to full tracking.
    pub fn failure_seen(&self) -> bool {
        self.failure_seen.load(Ordering::Acquire)
    }

    /// Returns `true` for the call that flipped the flag.
    pub fn mark_failure(&self) -> bool {
        !self.failure_seen.swap(true, Ordering::AcqRel)
    }
}

/// Result of caching a span.
#[derive(Debug)]
pub enum CacheOutcome {
    Cached,
    /// The session was cleared first; the span is handed back for the caller
    /// to persist as cancelled.
    SessionClosed(ElementSpan),
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<SessionEntry>>,
    spans: ElementSpanCache,
    last_spans: SingleElementCache,
    executions: DashMap<String, ExecutionMap>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session.
    pub fn put(&self, session: Session) -> Arc<SessionEntry> {
        let entry = Arc::new(SessionEntry::new(session));
        let id = entry.read().id.clone();
        self.sessions.insert(id, Arc::clone(&entry));
        entry
    }

    /// Look up a session. `None` means unknown or already finished.
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_registered(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Remove the session and everything cached for it.
    pub fn clear(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.spans.remove(session_id);
        self.last_spans.take(session_id);
        self.executions.remove(session_id);
    }

    /// Cache a span in the full cache. The caller holds the session lock.
    pub fn upsert_span(&self, session_id: &str, span: ElementSpan) -> CacheOutcome {
        if !self.is_registered(session_id) {
            return CacheOutcome::SessionClosed(span);
        }
        self.spans.insert(session_id, span);
        CacheOutcome::Cached
    }

    /// Overwrite the session's single slot. Dropped silently when the
    /// session is no longer registered.
    pub fn put_last_span(&self, session_id: &str, span: ElementSpan) -> bool {
        if !self.is_registered(session_id) {
            return false;
        }
        self.last_spans.put(session_id, span);
        true
    }

    /// Move the single-slot span into the full cache, returning its id.
    pub fn promote_to_full_cache(&self, session_id: &str) -> Option<String> {
        let span = self.last_spans.take(session_id)?;
        let id = span.id.clone();
        match self.upsert_span(session_id, span) {
            CacheOutcome::Cached => Some(id),
            CacheOutcome::SessionClosed(_) => None,
        }
    }

    /// Record `span_id` as the latest occurrence of an execution key.
    pub fn record_execution(&self, session_id: &str, execution_key: String, span_id: &str) {
        if !self.is_registered(session_id) {
            return;
        }
        self.executions
            .entry(session_id.to_string())
            .or_default()
            .insert(execution_key, span_id.to_string());
    }

    /// Span id of the occurrence that should contain a new child.
    pub fn resolve_parent(&self, session_id: &str, hint: &ParentHint) -> Option<String> {
        let executions = self.executions.get(session_id)?;
        let spans = self.spans.view(session_id);
        resolve_parent(hint, &executions, spans.as_deref())
    }

    pub fn spans(&self) -> &ElementSpanCache {
        &self.spans
    }

    pub fn last_spans(&self) -> &SingleElementCache {
        &self.last_spans
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
