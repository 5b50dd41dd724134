use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use reflex_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use reflex_core::domain::context::{ParamValue, RequestContext, TenantId};
use reflex_core::domain::plan::{BoundStep, ReplayPlan};
use reflex_core::domain::procedure::{
    Procedure, ProcedureId, ProcedureStep, ProcedureVersion, PromotionOptions, ReplayCandidate,
};
use reflex_core::domain::trace::{DecisionTrace, TraceId};
use reflex_core::errors::{ApplicationError, DomainError};
use reflex_core::fingerprint::ContextFingerprint;
use reflex_db::repositories::{ProcedureRepository, RepositoryError, TraceRepository};

/// Read/write surface over learned procedures and decision traces. All
/// reads are tenant-filtered by the underlying repositories.
pub struct ProceduralMemoryService {
    procedures: Arc<dyn ProcedureRepository>,
    traces: Arc<dyn TraceRepository>,
    audit: Arc<dyn AuditSink>,
}

impl ProceduralMemoryService {
    pub fn new(
        procedures: Arc<dyn ProcedureRepository>,
        traces: Arc<dyn TraceRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { procedures, traces, audit }
    }

    /// Replay lookup. A miss is the expected path and returns Ok(None).
    /// Each procedure is represented by its latest non-deprecated version;
    /// when several procedures collide on one fingerprint, the highest
    /// observed success rate wins, tie-broken by most recent promotion.
    pub async fn try_get_replay(
        &self,
        context: &RequestContext,
        fingerprint: &ContextFingerprint,
    ) -> Result<Option<ReplayPlan>, ApplicationError> {
        let versions = self
            .procedures
            .find_active_versions(&context.tenant_id, fingerprint.as_str())
            .await
            .map_err(store_error)?;

        // Newest active version per procedure; older versions never
        // compete with their own successor.
        let mut heads: Vec<(Procedure, ProcedureVersion)> = Vec::new();
        for (procedure, version) in versions {
            match heads.iter_mut().find(|(head, _)| head.id == procedure.id) {
                Some((_, head)) if head.version >= version.version => {}
                Some(entry) => entry.1 = version,
                None => heads.push((procedure, version)),
            }
        }

        let mut candidates = Vec::with_capacity(heads.len());
        for (procedure, version) in heads {
            let stats = self
                .traces
                .version_stats(&version.procedure_id, version.version)
                .await
                .map_err(store_error)?;
            candidates.push(ReplayCandidate {
                procedure,
                version,
                trace_successes: stats.successes,
                trace_attempts: stats.attempts,
            });
        }

        candidates.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then_with(|| b.version.promoted_at.cmp(&a.version.promoted_at))
        });

        Ok(candidates.first().map(|best| ReplayPlan::bind(best, &context.parameters)))
    }

    /// Appends a decision trace. A store failure is logged and audited as
    /// degraded capture but never propagated: losing one learning record
    /// must not fail the decision that produced it.
    pub async fn capture_trace(&self, trace: DecisionTrace) {
        let trace_id = trace.trace_id.clone();
        let tenant_id = trace.tenant_id.clone();
        let correlation_id = trace.correlation_id.clone();

        if let Err(error) = self.traces.append(trace).await {
            warn!(
                event_name = "trace.capture_degraded",
                trace_id = %trace_id.0,
                tenant_id = %tenant_id.0,
                error = %error,
                "failed to persist decision trace"
            );
            self.audit.emit(
                AuditEvent::new(
                    Some(tenant_id),
                    Some(trace_id),
                    correlation_id,
                    "trace.capture_degraded",
                    AuditCategory::Trace,
                    "memory-service",
                    AuditOutcome::Failed,
                )
                .with_metadata("error", error.to_string()),
            );
        }
    }

    /// Tenant-scoped trace read: a trace owned by another tenant is a
    /// miss.
    pub async fn find_trace(
        &self,
        trace_id: &TraceId,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionTrace>, ApplicationError> {
        self.traces.find_for_tenant(trace_id, tenant_id).await.map_err(store_error)
    }

    /// Promotes a successful trace into a replayable procedure version.
    /// Idempotent per trace id: re-promoting returns the version minted by
    /// the first call.
    pub async fn promote(
        &self,
        trace_id: &TraceId,
        options: PromotionOptions,
        now: DateTime<Utc>,
    ) -> Result<ProcedureVersion, ApplicationError> {
        if let Some(existing) =
            self.procedures.find_version_by_trace_id(trace_id).await.map_err(store_error)?
        {
            return Ok(existing);
        }

        let trace = self
            .traces
            .find_by_id(trace_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| invariant(format!("unknown trace `{}`", trace_id.0)))?;

        if !trace.execution_succeeded() {
            return Err(invariant(format!(
                "trace `{}` did not execute successfully and cannot be promoted",
                trace_id.0
            )));
        }
        if trace.steps.is_empty() {
            return Err(invariant(format!("trace `{}` carries no plan steps", trace_id.0)));
        }

        let procedure = match self
            .procedures
            .find_by_fingerprint(&trace.tenant_id, &trace.fingerprint)
            .await
            .map_err(store_error)?
        {
            Some(existing) => existing,
            None => {
                let minted = Procedure {
                    id: ProcedureId::generate(),
                    tenant_id: trace.tenant_id.clone(),
                    fingerprint: trace.fingerprint.clone(),
                    name: options
                        .name
                        .clone()
                        .unwrap_or_else(|| trace.action_type.clone()),
                    created_at: now,
                };
                self.procedures.insert_procedure(minted.clone()).await.map_err(store_error)?;
                minted
            }
        };

        let next_version = self
            .procedures
            .latest_version(&procedure.id)
            .await
            .map_err(store_error)?
            .map_or(1, |latest| latest + 1);

        let version = ProcedureVersion {
            procedure_id: procedure.id.clone(),
            version: next_version,
            steps: compile_templates(&trace.steps, &trace.parameters),
            requires_validation: options.requires_validation,
            deprecated: false,
            promoted_from_trace_id: trace_id.clone(),
            promoted_at: now,
        };

        match self.procedures.insert_version(version.clone()).await {
            Ok(()) => Ok(version),
            // A concurrent promotion of the same trace may win the insert;
            // the unique trace-id constraint makes the race observable.
            Err(insert_error) => {
                if let Some(existing) = self
                    .procedures
                    .find_version_by_trace_id(trace_id)
                    .await
                    .map_err(store_error)?
                {
                    return Ok(existing);
                }
                Err(store_error(insert_error))
            }
        }
    }

    /// Marks a version non-replayable without deleting its history.
    pub async fn deprecate(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<(), ApplicationError> {
        let deprecated =
            self.procedures.deprecate_version(procedure_id, version).await.map_err(store_error)?;
        if !deprecated {
            return Err(invariant(format!(
                "procedure `{}` has no version {version}",
                procedure_id.0
            )));
        }
        Ok(())
    }
}

/// Generalizes bound steps back into templates: argument substrings equal
/// to a rendered parameter value become `{{key}}` placeholders. Values
/// shorter than two characters are skipped to avoid spurious matches.
fn compile_templates(
    steps: &[BoundStep],
    parameters: &BTreeMap<String, ParamValue>,
) -> Vec<ProcedureStep> {
    let mut rendered: Vec<(String, String)> = parameters
        .iter()
        .map(|(key, value)| (key.clone(), value.render()))
        .filter(|(_, value)| value.chars().count() >= 2)
        .collect();
    // Longest value first so "New York City" templates before "New York".
    rendered.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    steps
        .iter()
        .map(|step| {
            let arg_template = step
                .args
                .iter()
                .map(|(arg_key, arg_value)| {
                    let mut templated = arg_value.clone();
                    for (param_key, param_value) in &rendered {
                        templated = templated.replace(param_value, &format!("{{{{{param_key}}}}}"));
                    }
                    (arg_key.clone(), templated)
                })
                .collect();
            ProcedureStep { kind: step.kind, name: step.name.clone(), arg_template }
        })
        .collect()
}

fn store_error(error: RepositoryError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn invariant(message: String) -> ApplicationError {
    ApplicationError::Domain(DomainError::InvariantViolation(message))
}
