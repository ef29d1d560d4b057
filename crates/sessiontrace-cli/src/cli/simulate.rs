//! Synthetic sessions for exercising a pipeline end to end

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sessiontrace_core::{BulkStore, PipelineConfig, PipelineStats, StaticPolicy, TracePipeline};
use sessiontrace_span::{
    ElementDescriptor, ExceptionSummary, ExecutionStatus, LoggingLevel, ParentHint,
    PayloadSnapshot, SessionStart, SpanOutcome, SpanRef,
};
use std::sync::Arc;
use std::time::Instant;

const SIMULATED_CHAIN_ID: &str = "simulated-chain";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationPlan {
    pub sessions: usize,
    pub steps: usize,
    pub level: LoggingLevel,
    pub fail_at: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub sessions: usize,
    pub steps_per_session: usize,
    pub level: LoggingLevel,
    pub sampled_sessions: usize,
    pub elapsed_ms: u64,
    /// Documents held by the in-memory store after a dry run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_documents: Option<usize>,
    pub stats: PipelineStats,
}

/// Run every session of the plan concurrently, then shut the pipeline down
/// so the report reflects everything that was flushed.
pub async fn run_simulation(
    config: PipelineConfig,
    plan: SimulationPlan,
    store: Arc<dyn BulkStore>,
) -> anyhow::Result<SimulationReport> {
    let policy = StaticPolicy::new(plan.level);
    let pipeline = Arc::new(TracePipeline::start(config, store, Arc::new(policy))?);
    let started = Instant::now();

    let mut handles = Vec::with_capacity(plan.sessions);
    for index in 0..plan.sessions {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            run_session(&pipeline, index, plan).await
        }));
    }

    let mut sampled_sessions = 0;
    for handle in handles {
        if handle.await? {
            sampled_sessions += 1;
        }
    }
    pipeline.shutdown().await;

    let report = SimulationReport {
        sessions: plan.sessions,
        steps_per_session: plan.steps,
        level: plan.level,
        sampled_sessions,
        elapsed_ms: started.elapsed().as_millis() as u64,
        stored_documents: None,
        stats: pipeline.stats(),
    };
    tracing::info!(
        sessions = report.sessions,
        scheduled = report.stats.scheduled,
        flushed = report.stats.flushed,
        dropped = report.stats.dropped,
        lost = report.stats.lost,
        "Simulation finished"
    );
    Ok(report)
}

/// One session: steps nest inside each other and unwind innermost first.
async fn run_session(pipeline: &TracePipeline, index: usize, plan: SimulationPlan) -> bool {
    let session_id = format!("sim-{}-{}", std::process::id(), index);
    let started = Instant::now();
    let sampled = pipeline.on_session_start(
        SessionStart::new(session_id.as_str(), SIMULATED_CHAIN_ID, "Simulated chain")
            .with_external_id(format!("ext-{index}"))
            .with_domain("simulation"),
    );

    let mut open: Vec<SpanRef> = Vec::with_capacity(plan.steps);
    let mut failed = false;
    for step in 0..plan.steps {
        let type_tag = if step == 0 { "trigger" } else { "script" };
        let element = ElementDescriptor::new(format!("step-{step}"), format!("Step {step}"), type_tag);
        let parent = step
            .checked_sub(1)
            .map(|previous| ParentHint::new(format!("step-{previous}")));
        let before = PayloadSnapshot::default()
            .with_body(format!("{{\"session\":{index},\"step\":{step}}}"))
            .with_header("x-step", step.to_string())
            .with_context("session_index", index.to_string());

        open.push(pipeline.on_span_before(&session_id, &element, parent.as_ref(), before));
        tokio::task::yield_now().await;

        if plan.fail_at == Some(step) {
            failed = true;
            break;
        }
    }

    let innermost = open.len().saturating_sub(1);
    for (depth, span) in open.iter().enumerate().rev() {
        let outcome = if failed && depth == innermost {
            SpanOutcome::Failure(ExceptionSummary::new(
                "SimulatedFailure",
                format!("step {depth} failed"),
            ))
        } else {
            SpanOutcome::Success
        };
        let after = PayloadSnapshot::default().with_body("{\"ok\":true}");
        pipeline.on_span_after(span, after, outcome);
    }

    let status = if failed {
        ExecutionStatus::CompletedWithErrors
    } else {
        ExecutionStatus::CompletedNormally
    };
    pipeline.on_session_finish(
        &session_id,
        status,
        Utc::now(),
        started.elapsed().as_millis() as u64,
    );
    sampled
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessiontrace_core::MemoryStore;

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .retry_config(2, 1, 5)
            .build()
            .unwrap()
    }

    fn plan(level: LoggingLevel, fail_at: Option<usize>) -> SimulationPlan {
        SimulationPlan {
            sessions: 4,
            steps: 3,
            level,
            fail_at,
        }
    }

    #[tokio::test]
    async fn test_debug_simulation_persists_every_step() {
        let store = MemoryStore::new();
        let report = run_simulation(config(), plan(LoggingLevel::Debug, None), Arc::new(store.clone()))
            .await
            .unwrap();

        assert_eq!(report.sampled_sessions, 4);
        assert_eq!(store.count("sessions"), 12);
        assert_eq!(report.stats.active_sessions, 0);
        assert_eq!(report.stats.lost, 0);

        let nested = store
            .documents("sessions")
            .into_iter()
            .filter(|doc| doc["chain_element_id"] == "step-2")
            .all(|doc| doc.get("parent_element_id").is_some());
        assert!(nested);
    }

    #[tokio::test]
    async fn test_error_simulation_persists_failing_step_only() {
        let store = MemoryStore::new();
        run_simulation(config(), plan(LoggingLevel::Error, Some(1)), Arc::new(store.clone()))
            .await
            .unwrap();

        let docs = store.documents("sessions");
        assert_eq!(docs.len(), 4);
        assert!(docs
            .iter()
            .all(|doc| doc["execution_status"] == "COMPLETED_WITH_ERRORS"
                && doc["chain_element_id"] == "step-1"));
    }

    #[test]
    fn test_off_simulation_persists_nothing() {
        let store = MemoryStore::new();
        let report = tokio_test::block_on(async {
            let runtime_store: Arc<dyn BulkStore> = Arc::new(store.clone());
            run_simulation(config(), plan(LoggingLevel::Off, None), runtime_store).await
        })
        .unwrap();

        assert_eq!(report.sampled_sessions, 0);
        assert_eq!(store.count("sessions"), 0);
    }
}
