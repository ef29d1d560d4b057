//! Per-session span caches
//!
//! [`ElementSpanCache`] keeps every span of a fully tracked session so the
//! parent resolver can inspect in-flight occurrences and so finalize can
//! re-stamp session fields onto each of them. [`SingleElementCache`] keeps
//! only the latest span of an ERROR-tier session: bounded memory, and the
//! one step worth persisting if a failure follows.
//!
//! Neither cache checks session liveness; [`crate::registry::SessionRegistry`]
//! does that under the session lock before touching them.

use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use sessiontrace_span::ElementSpan;
use std::collections::HashMap;

/// Spans of one session, keyed by span id.
pub type SessionSpans = HashMap<String, ElementSpan>;

#[derive(Debug, Default)]
pub struct ElementSpanCache {
    sessions: DashMap<String, SessionSpans>,
}

impl ElementSpanCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a span.
    pub fn insert(&self, session_id: &str, span: ElementSpan) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(span.id.clone(), span);
    }

    /// Apply `f` to a cached span in place.
    pub fn update<R>(
        &self,
        session_id: &str,
        span_id: &str,
        f: impl FnOnce(&mut ElementSpan) -> R,
    ) -> Option<R> {
        let mut spans = self.sessions.get_mut(session_id)?;
        spans.get_mut(span_id).map(f)
    }

    pub fn get(&self, session_id: &str, span_id: &str) -> Option<ElementSpan> {
        self.sessions
            .get(session_id)
            .and_then(|spans| spans.get(span_id).cloned())
    }

    pub fn contains(&self, session_id: &str, span_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map_or(false, |spans| spans.contains_key(span_id))
    }

    /// Read-only view of a session's spans.
    ///
    /// The view holds a shard lock: drop it before mutating this cache.
    pub fn view(&self, session_id: &str) -> Option<Ref<'_, String, SessionSpans>> {
        self.sessions.get(session_id)
    }

    /// Live mutable view of a session's spans, used by finalize.
    pub fn all_for_session(&self, session_id: &str) -> Option<RefMut<'_, String, SessionSpans>> {
        self.sessions.get_mut(session_id)
    }

    pub fn len_for(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, |spans| spans.len())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionSpans> {
        self.sessions.remove(session_id).map(|(_, spans)| spans)
    }

    /// Number of sessions with at least one cached span.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[derive(Debug, Default)]
pub struct SingleElementCache {
    slots: DashMap<String, ElementSpan>,
}

impl SingleElementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the session's slot.
    pub fn put(&self, session_id: &str, span: ElementSpan) {
        self.slots.insert(session_id.to_string(), span);
    }

    /// Apply `f` to the held span if it is `span_id`.
    pub fn update<R>(
        &self,
        session_id: &str,
        span_id: &str,
        f: impl FnOnce(&mut ElementSpan) -> R,
    ) -> Option<R> {
        let mut slot = self.slots.get_mut(session_id)?;
        if slot.id == span_id {
            Some(f(slot.value_mut()))
        } else {
            None
        }
    }

    pub fn held_id(&self, session_id: &str) -> Option<String> {
        self.slots.get(session_id).map(|slot| slot.id.clone())
    }

    pub fn take(&self, session_id: &str) -> Option<ElementSpan> {
        self.slots.remove(session_id).map(|(_, span)| span)
    }

    /// Remove the held span only if it is `span_id`.
    pub fn take_if(&self, session_id: &str, span_id: &str) -> Option<ElementSpan> {
        self.slots
            .remove_if(session_id, |_, held| held.id == span_id)
            .map(|(_, span)| span)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sessiontrace_span::{
        ElementDescriptor, ExecutionStatus, LoggingLevel, Session, SessionStart, SpanOutcome,
    };

    fn span(id: &str) -> ElementSpan {
        let session = Session::new(
            SessionStart::new("s-1", "chain-1", "Orders"),
            LoggingLevel::Debug,
            true,
        );
        let element = ElementDescriptor::new("el-1", "Step", "script");
        ElementSpan::new(id, "s-1", &element, None, Utc::now(), session.stamp())
    }

    #[test]
    fn test_span_cache_insert_and_update() {
        let cache = ElementSpanCache::new();
        cache.insert("s-1", span("a"));
        cache.insert("s-1", span("b"));
        assert_eq!(cache.len_for("s-1"), 2);

        let updated = cache.update("s-1", "a", |s| {
            s.complete(None, SpanOutcome::Success, Utc::now());
            s.execution_status
        });
        assert_eq!(updated, Some(ExecutionStatus::CompletedNormally));
        assert!(cache.update("s-1", "missing", |_| ()).is_none());
        assert!(cache.update("s-2", "a", |_| ()).is_none());
    }

    #[test]
    fn test_span_cache_insert_replaces_same_id() {
        let cache = ElementSpanCache::new();
        cache.insert("s-1", span("a"));
        let mut replacement = span("a");
        replacement.element_name = "Renamed".to_string();
        cache.insert("s-1", replacement);

        assert_eq!(cache.len_for("s-1"), 1);
        assert_eq!(cache.get("s-1", "a").unwrap().element_name, "Renamed");
    }

    #[test]
    fn test_span_cache_live_view_and_remove() {
        let cache = ElementSpanCache::new();
        cache.insert("s-1", span("a"));
        {
            let mut view = cache.all_for_session("s-1").unwrap();
            for s in view.values_mut() {
                s.abandon();
            }
        }
        assert_eq!(
            cache.get("s-1", "a").unwrap().execution_status,
            ExecutionStatus::CancelledOrUnknown
        );

        let removed = cache.remove("s-1").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(cache.session_count(), 0);
    }

    #[test]
    fn test_single_slot_keeps_only_latest() {
        let cache = SingleElementCache::new();
        for id in ["a", "b", "c"] {
            cache.put("s-1", span(id));
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.held_id("s-1").as_deref(), Some("c"));

        assert!(cache.update("s-1", "a", |_| ()).is_none());
        assert!(cache.update("s-1", "c", |_| ()).is_some());
        assert_eq!(cache.take("s-1").unwrap().id, "c");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_take_if_checks_held_id() {
        let cache = SingleElementCache::new();
        cache.put("s-1", span("a"));
        cache.put("s-1", span("b"));

        assert!(cache.take_if("s-1", "a").is_none());
        assert_eq!(cache.held_id("s-1").as_deref(), Some("b"));
        assert!(cache.take_if("s-2", "b").is_none());

        assert_eq!(cache.take_if("s-1", "b").unwrap().id, "b");
        assert!(cache.is_empty());
    }
}
