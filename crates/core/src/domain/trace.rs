use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::domain::context::{OrgId, ParamValue, RequestContext, TenantId};
use crate::domain::plan::BoundStep;
use crate::domain::procedure::ProcedureId;
use crate::pii::{redact_parameters, redact_text};
use crate::validation::ValidationOutcome;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn generate() -> Self {
        Self(format!("tr-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Replay,
    Planned,
    None,
}

impl PlanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Replay => "replay",
            Self::Planned => "planned",
            Self::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replay" => Some(Self::Replay),
            "planned" => Some(Self::Planned),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// Outcome returned to the caller. The failure reason is human-readable
/// and PII-free; `reason_code` is stable for programmatic handling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub failure_reason: Option<String>,
    pub reason_code: Option<String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self { success: true, failure_reason: None, reason_code: None }
    }

    pub fn failure(reason_code: &'static str, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            reason_code: Some(reason_code.to_owned()),
        }
    }
}

/// Append-only record of one decision-and-execution attempt. Immutable
/// once written; the input to offline promotion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub trace_id: TraceId,
    pub tenant_id: TenantId,
    pub organization_id: OrgId,
    pub fingerprint: String,
    pub action_type: String,
    pub channel: String,
    /// PII-redacted snapshot of the request parameters.
    pub parameters: BTreeMap<String, ParamValue>,
    pub plan_source: PlanSource,
    pub procedure_id: Option<ProcedureId>,
    pub procedure_version: Option<u32>,
    /// The bound steps of the plan that was validated, empty when no plan
    /// was produced. Promotion compiles these back into templates.
    pub steps: Vec<BoundStep>,
    pub allowed: bool,
    pub override_required: bool,
    pub validation_reasons: Vec<String>,
    pub execution: Option<ExecutionResult>,
    pub content_hash: String,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DecisionTrace {
    /// Build a trace from the decision's moving parts. Redaction happens
    /// here so no unredacted parameter ever crosses the store boundary.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        trace_id: TraceId,
        context: &RequestContext,
        fingerprint: impl Into<String>,
        plan_source: PlanSource,
        procedure_id: Option<ProcedureId>,
        procedure_version: Option<u32>,
        steps: Vec<BoundStep>,
        outcome: &ValidationOutcome,
        execution: Option<ExecutionResult>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let parameters = redact_parameters(&context.parameters);
        let steps = steps
            .into_iter()
            .map(|step| BoundStep {
                args: step
                    .args
                    .into_iter()
                    .map(|(key, value)| (key, redact_text(&value)))
                    .collect(),
                ..step
            })
            .collect();
        let completed_at = Utc::now();
        let fingerprint = fingerprint.into();
        let content_hash = content_hash(
            &trace_id,
            &context.tenant_id,
            &fingerprint,
            plan_source,
            outcome.allowed,
            execution.as_ref(),
            occurred_at,
        );

        Self {
            trace_id,
            tenant_id: context.tenant_id.clone(),
            organization_id: context.organization_id.clone(),
            fingerprint,
            action_type: context.action_type.clone(),
            channel: context.channel.as_str().to_owned(),
            parameters,
            plan_source,
            procedure_id,
            procedure_version,
            steps,
            allowed: outcome.allowed,
            override_required: outcome.override_required,
            validation_reasons: outcome.reasons.clone(),
            execution,
            content_hash,
            correlation_id: context.correlation_id.clone(),
            occurred_at,
            completed_at,
        }
    }

    pub fn execution_succeeded(&self) -> bool {
        self.execution.as_ref().is_some_and(|result| result.success)
    }
}

fn content_hash(
    trace_id: &TraceId,
    tenant_id: &TenantId,
    fingerprint: &str,
    plan_source: PlanSource,
    allowed: bool,
    execution: Option<&ExecutionResult>,
    occurred_at: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(trace_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(tenant_id.0.as_bytes());
    hasher.update(b"|");
    hasher.update(fingerprint.as_bytes());
    hasher.update(b"|");
    hasher.update(plan_source.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update([u8::from(allowed)]);
    hasher.update(b"|");
    hasher.update([execution.map(|result| u8::from(result.success)).unwrap_or(2)]);
    hasher.update(b"|");
    hasher.update(occurred_at.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::domain::context::{
        Channel, OrgId, ParamValue, RequestContext, RiskBand, TenantId,
    };
    use crate::validation::ValidationOutcome;

    use super::{DecisionTrace, ExecutionResult, PlanSource, TraceId};

    fn context() -> RequestContext {
        RequestContext {
            tenant_id: TenantId("t-1".to_owned()),
            organization_id: OrgId("org-1".to_owned()),
            user_id: None,
            contact_id: None,
            action_type: "send-followup-sms".to_owned(),
            channel: Channel::Sms,
            industry: "insurance".to_owned(),
            risk_band: RiskBand::Standard,
            parameters: BTreeMap::from([(
                "note".to_owned(),
                ParamValue::Text("email dana@example.com".to_owned()),
            )]),
            overrides: BTreeMap::new(),
            occurred_at: None,
            correlation_id: "corr-1".to_owned(),
        }
    }

    #[test]
    fn record_redacts_pii_from_parameter_snapshot() {
        let trace = DecisionTrace::record(
            TraceId("tr-1".to_owned()),
            &context(),
            "fp-abc",
            PlanSource::Planned,
            None,
            None,
            Vec::new(),
            &ValidationOutcome::allowed(),
            Some(ExecutionResult::success()),
            Utc::now(),
        );

        assert_eq!(trace.parameters["note"], ParamValue::Text("[redacted:email]".to_owned()));
        assert!(trace.execution_succeeded());
        assert!(!trace.content_hash.is_empty());
    }

    #[test]
    fn content_hash_distinguishes_outcomes() {
        let occurred_at = Utc::now();
        let allowed = DecisionTrace::record(
            TraceId("tr-2".to_owned()),
            &context(),
            "fp-abc",
            PlanSource::Planned,
            None,
            None,
            Vec::new(),
            &ValidationOutcome::allowed(),
            Some(ExecutionResult::success()),
            occurred_at,
        );
        let blocked = DecisionTrace::record(
            TraceId("tr-2".to_owned()),
            &context(),
            "fp-abc",
            PlanSource::Planned,
            None,
            None,
            Vec::new(),
            &ValidationOutcome::blocked(vec!["guardrail".to_owned()]),
            None,
            occurred_at,
        );

        assert_ne!(allowed.content_hash, blocked.content_hash);
    }
}
