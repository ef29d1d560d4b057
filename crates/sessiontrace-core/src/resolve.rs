//! Parent resolution for repeated chain elements.
//!
//! The execution map of a session records, per execution key, the span id
//! most recently assigned to it. When a logical parent can run several
//! overlapping times (loops, splits, re-used branches), the most recent
//! assignment is not necessarily the occurrence that encloses a new child,
//! so the resolver walks the cached spans breadth-first from the candidate
//! towards the innermost occurrence that is still open.

use std::collections::{HashMap, HashSet, VecDeque};

use sessiontrace_span::ParentHint;

use crate::cache::SessionSpans;

/// Execution key -> most recently assigned span id.
pub type ExecutionMap = HashMap<String, String>;

/// Resolve the span id that should contain a new child.
///
/// Returns `None` when the declared parent never executed in this session.
pub fn resolve_parent(
    hint: &ParentHint,
    executions: &ExecutionMap,
    spans: Option<&SessionSpans>,
) -> Option<String> {
    let candidate = executions.get(&hint.execution_key())?.clone();
    if !hint.has_intermediate_parents {
        return Some(candidate);
    }
    let Some(spans) = spans else {
        return Some(candidate);
    };

    let occurrences: HashSet<&str> = executions.values().map(String::as_str).collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue = VecDeque::from([candidate.clone()]);
    let mut best = candidate;

    while let Some(frontier) = queue.pop_front() {
        if !visited.insert(frontier.clone()) {
            continue;
        }
        let next = spans.values().find(|span| {
            span.parent_element_id.as_deref() == Some(frontier.as_str())
                && span.chain_element_id == hint.chain_element_id
                && occurrences.contains(span.id.as_str())
                && span.is_in_progress()
        });
        if let Some(span) = next {
            best = span.id.clone();
            queue.push_back(span.id.clone());
        }
    }

    Some(best)
}
