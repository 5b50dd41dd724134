use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use reflex_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use reflex_core::domain::context::RequestContext;
use reflex_core::domain::plan::PlanCandidate;
use reflex_core::domain::trace::{DecisionTrace, ExecutionResult, PlanSource, TraceId};
use reflex_core::telemetry::{DecisionDimensions, TelemetrySink};
use reflex_core::validation::{ValidationOutcome, ValidationPipeline, ValidationStage};
use reflex_core::fingerprint::{fingerprint, ContextFingerprint};

use crate::executor::ExecutorRegistry;
use crate::memory::ProceduralMemoryService;
use crate::planner::PlannerGateway;

pub const REASON_INVALID_CONTEXT: &str = "invalid_context";
pub const REASON_RELEVANCE_BLOCKED: &str = "relevance_blocked";
pub const REASON_GUARDRAIL_BLOCKED: &str = "guardrail_blocked";
pub const REASON_OVERRIDE_REQUIRED: &str = "override_required";
pub const REASON_PLANNER_UNAVAILABLE: &str = "planner_unavailable";
pub const REASON_STORE_UNAVAILABLE: &str = "store_unavailable";
pub const REASON_EXECUTION_FAILED: &str = "execution_failed";

/// What the caller gets back from one decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecisionResponse {
    pub result: ExecutionResult,
    pub trace_id: TraceId,
    pub replayed: bool,
    pub fallback: bool,
}

/// Drives one request through fingerprint → replay-or-plan → validation →
/// execution → trace capture. Stateless per call; collaborators are shared
/// handles built once at startup.
pub struct Orchestrator {
    memory: Arc<ProceduralMemoryService>,
    planner: Arc<dyn PlannerGateway>,
    executors: Arc<ExecutorRegistry>,
    pipeline: ValidationPipeline,
    audit: Arc<dyn AuditSink>,
    telemetry: Arc<dyn TelemetrySink>,
    planner_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<ProceduralMemoryService>,
        planner: Arc<dyn PlannerGateway>,
        executors: Arc<ExecutorRegistry>,
        pipeline: ValidationPipeline,
        audit: Arc<dyn AuditSink>,
        telemetry: Arc<dyn TelemetrySink>,
        planner_timeout: Duration,
    ) -> Self {
        Self { memory, planner, executors, pipeline, audit, telemetry, planner_timeout }
    }

    /// One complete decision. Never panics and never returns early without
    /// a trace-capture attempt and a telemetry record.
    pub async fn decide(&self, context: RequestContext) -> DecisionResponse {
        let now = Utc::now();
        let trace_id = TraceId::generate();
        let fp = fingerprint(&context);

        if let Err(error) = context.ensure_tenancy() {
            let outcome = ValidationOutcome::blocked(vec![error.to_string()]);
            let result = ExecutionResult::failure(REASON_INVALID_CONTEXT, error.to_string());
            return self
                .finish(&context, trace_id, &fp, None, &outcome, result, false, false, false, now)
                .await;
        }

        let mut fallback = false;
        let mut candidate = match self.memory.try_get_replay(&context, &fp).await {
            Ok(found) => found.map(PlanCandidate::Replay),
            Err(error) => {
                warn!(
                    event_name = "decision.store_unavailable",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "replay lookup failed"
                );
                let outcome = ValidationOutcome::blocked(vec!["memory store unavailable".into()]);
                let result = ExecutionResult::failure(
                    REASON_STORE_UNAVAILABLE,
                    "memory store unavailable",
                );
                return self
                    .finish(
                        &context, trace_id, &fp, None, &outcome, result, false, false, false, now,
                    )
                    .await;
            }
        };

        if let Some(replay) = candidate.take() {
            let replay_outcome = self.pipeline.run(&context, &replay, now, self.audit.as_ref());
            if replay_outcome.allowed {
                return self
                    .execute_and_finish(&context, trace_id, &fp, replay, replay_outcome, false, now)
                    .await;
            }

            // Replay denied: fall back to a fresh plan rather than failing
            // the request outright. The fresh plan is validated on its own.
            fallback = true;
            self.audit.emit(
                AuditEvent::new(
                    Some(context.tenant_id.clone()),
                    Some(trace_id.clone()),
                    context.correlation_id.clone(),
                    "decision.replay_denied",
                    AuditCategory::Decision,
                    "orchestrator",
                    AuditOutcome::Rejected,
                )
                .with_metadata("reasons", replay_outcome.reason().unwrap_or_default()),
            );
        }

        let planned =
            tokio::time::timeout(self.planner_timeout, self.planner.plan(&context, &trace_id))
                .await;
        let plan = match planned {
            Ok(Ok(plan)) => plan,
            Ok(Err(error)) => {
                warn!(
                    event_name = "decision.planner_unavailable",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "planner gateway failed"
                );
                let outcome = ValidationOutcome::blocked(vec!["planning unavailable".into()]);
                let result =
                    ExecutionResult::failure(REASON_PLANNER_UNAVAILABLE, "planning unavailable");
                return self
                    .finish(
                        &context, trace_id, &fp, None, &outcome, result, false, fallback, false,
                        now,
                    )
                    .await;
            }
            Err(_elapsed) => {
                warn!(
                    event_name = "decision.planner_timeout",
                    correlation_id = %context.correlation_id,
                    timeout_secs = self.planner_timeout.as_secs(),
                    "planner gateway timed out"
                );
                let outcome = ValidationOutcome::blocked(vec!["planning unavailable".into()]);
                let result =
                    ExecutionResult::failure(REASON_PLANNER_UNAVAILABLE, "planning unavailable");
                return self
                    .finish(
                        &context, trace_id, &fp, None, &outcome, result, false, fallback, false,
                        now,
                    )
                    .await;
            }
        };

        let candidate = PlanCandidate::Planned(plan);
        let outcome = self.pipeline.run(&context, &candidate, now, self.audit.as_ref());
        if outcome.allowed {
            return self
                .execute_and_finish(&context, trace_id, &fp, candidate, outcome, fallback, now)
                .await;
        }

        let result = denial_result(&outcome);
        self.finish(
            &context,
            trace_id,
            &fp,
            Some(&candidate),
            &outcome,
            result,
            false,
            fallback,
            false,
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_and_finish(
        &self,
        context: &RequestContext,
        trace_id: TraceId,
        fp: &ContextFingerprint,
        candidate: PlanCandidate,
        outcome: ValidationOutcome,
        fallback: bool,
        now: chrono::DateTime<Utc>,
    ) -> DecisionResponse {
        let result = match self.executors.execute_plan(candidate.steps(), context).await {
            Ok(_outcomes) => ExecutionResult::success(),
            Err(error) => {
                warn!(
                    event_name = "decision.execution_failed",
                    correlation_id = %context.correlation_id,
                    error = %error,
                    "plan execution failed"
                );
                ExecutionResult::failure(REASON_EXECUTION_FAILED, "action execution failed")
            }
        };

        self.finish(
            context,
            trace_id,
            fp,
            Some(&candidate),
            &outcome,
            result,
            true,
            fallback,
            candidate.is_replay(),
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        context: &RequestContext,
        trace_id: TraceId,
        fp: &ContextFingerprint,
        candidate: Option<&PlanCandidate>,
        outcome: &ValidationOutcome,
        result: ExecutionResult,
        executed: bool,
        fallback: bool,
        replayed: bool,
        now: chrono::DateTime<Utc>,
    ) -> DecisionResponse {
        let plan_source = match candidate {
            Some(PlanCandidate::Replay(_)) => PlanSource::Replay,
            Some(PlanCandidate::Planned(_)) => PlanSource::Planned,
            None => PlanSource::None,
        };
        let procedure = candidate.and_then(|c| c.procedure());
        let steps = candidate.map(|c| c.steps().to_vec()).unwrap_or_default();

        let trace = DecisionTrace::record(
            trace_id.clone(),
            context,
            fp.as_str(),
            plan_source,
            procedure.map(|(id, _)| id.clone()),
            procedure.map(|(_, version)| version),
            steps,
            outcome,
            executed.then(|| result.clone()),
            now,
        );
        self.memory.capture_trace(trace).await;

        self.telemetry.record(DecisionDimensions::new(
            procedure,
            trace_id.clone(),
            context.tenant_id.clone(),
            replayed,
            fallback,
            outcome.override_required,
        ));

        let audit_outcome = if result.success {
            AuditOutcome::Success
        } else if outcome.allowed {
            AuditOutcome::Failed
        } else {
            AuditOutcome::Rejected
        };
        self.audit.emit(
            AuditEvent::new(
                Some(context.tenant_id.clone()),
                Some(trace_id.clone()),
                context.correlation_id.clone(),
                "decision.completed",
                AuditCategory::Decision,
                "orchestrator",
                audit_outcome,
            )
            .with_metadata("plan_source", plan_source.as_str())
            .with_metadata("fallback", fallback.to_string()),
        );

        info!(
            event_name = "decision.completed",
            trace_id = %trace_id.0,
            tenant_id = %context.tenant_id.0,
            correlation_id = %context.correlation_id,
            plan_source = plan_source.as_str(),
            success = result.success,
            replayed,
            fallback,
            "decision completed"
        );

        DecisionResponse { result, trace_id, replayed, fallback }
    }
}

/// Maps a blocking validation outcome to a stable reason code plus the
/// outcome's redacted human reason.
fn denial_result(outcome: &ValidationOutcome) -> ExecutionResult {
    let reason_code = if outcome.override_required {
        REASON_OVERRIDE_REQUIRED
    } else if outcome.stage_trail.contains(&ValidationStage::RiskAndGuardrails) {
        REASON_GUARDRAIL_BLOCKED
    } else {
        REASON_RELEVANCE_BLOCKED
    };
    let reason = outcome.reason().unwrap_or_else(|| "request was not allowed".to_owned());
    ExecutionResult::failure(reason_code, reason)
}

#[cfg(test)]
mod tests {
    use reflex_core::validation::{ValidationOutcome, ValidationStage};

    use super::{
        denial_result, REASON_GUARDRAIL_BLOCKED, REASON_OVERRIDE_REQUIRED,
        REASON_RELEVANCE_BLOCKED,
    };

    #[test]
    fn denial_reason_codes_follow_the_blocking_stage() {
        let mut relevance = ValidationOutcome::blocked(vec!["personal data".to_owned()]);
        relevance.stage_trail =
            vec![ValidationStage::Start, ValidationStage::Relevance, ValidationStage::Blocked];
        assert_eq!(denial_result(&relevance).reason_code.as_deref(), Some(REASON_RELEVANCE_BLOCKED));

        let mut guardrail = ValidationOutcome::blocked(vec!["blocked term".to_owned()]);
        guardrail.stage_trail = vec![
            ValidationStage::Start,
            ValidationStage::Relevance,
            ValidationStage::RiskAndGuardrails,
            ValidationStage::Blocked,
        ];
        assert_eq!(denial_result(&guardrail).reason_code.as_deref(), Some(REASON_GUARDRAIL_BLOCKED));

        let mut override_needed = ValidationOutcome::blocked(vec!["after_hours".to_owned()]);
        override_needed.override_required = true;
        assert_eq!(
            denial_result(&override_needed).reason_code.as_deref(),
            Some(REASON_OVERRIDE_REQUIRED)
        );
    }
}
