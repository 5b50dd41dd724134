//! Override stage: override-required findings block unless the caller
//! pre-acknowledged each flagged risk class. Every exercised override is
//! audited with who exercised it and why.

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::context::RequestContext;
use crate::validation::guardrails::GuardrailFinding;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverrideResolution {
    pub allowed: bool,
    /// One reason per flagged risk class; always populated when the
    /// override stage ran with override_required set.
    pub reasons: Vec<String>,
    pub exercised: Vec<String>,
    pub missing: Vec<String>,
}

pub fn resolve<S: AuditSink + ?Sized>(
    context: &RequestContext,
    findings: &[GuardrailFinding],
    audit: &S,
) -> OverrideResolution {
    let mut reasons = Vec::new();
    let mut exercised = Vec::new();
    let mut missing = Vec::new();

    let actor = context
        .user_id
        .as_ref()
        .map(|user| format!("agent:{}", user.0))
        .unwrap_or_else(|| "agent:unknown".to_owned());

    for finding in findings {
        let Some(risk_class) = finding.risk_class else {
            continue;
        };
        reasons.push(format!("{risk_class}: {}", finding.detail));

        if context.override_enabled(risk_class) {
            exercised.push(risk_class.to_owned());
            audit.emit(
                AuditEvent::new(
                    Some(context.tenant_id.clone()),
                    None,
                    context.correlation_id.clone(),
                    "override.exercised",
                    AuditCategory::Override,
                    actor.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("risk_class", risk_class)
                .with_metadata("reason", finding.detail.clone()),
            );
        } else {
            missing.push(risk_class.to_owned());
        }
    }

    if !missing.is_empty() {
        audit.emit(
            AuditEvent::new(
                Some(context.tenant_id.clone()),
                None,
                context.correlation_id.clone(),
                "override.required",
                AuditCategory::Override,
                actor,
                AuditOutcome::Rejected,
            )
            .with_metadata("missing_risk_classes", missing.join(",")),
        );
    }

    OverrideResolution { allowed: missing.is_empty(), reasons, exercised, missing }
}
