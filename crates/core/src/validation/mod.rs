//! Validation pipeline: Start → Relevance → RiskAndGuardrails → Override
//! → {Allowed | Blocked}. Terminal outcomes are final for the run; a
//! caller may only re-enter at Start with a new request.

pub mod guardrails;
pub mod overrides;
pub mod relevance;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::context::RequestContext;
use crate::domain::plan::PlanCandidate;
use guardrails::{GuardrailConfig, GuardrailFinding, GuardrailSeverity};
use relevance::{RelevanceDecision, RelevancePolicy};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Start,
    Relevance,
    RiskAndGuardrails,
    Override,
    Allowed,
    Blocked,
}

impl ValidationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Relevance => "relevance",
            Self::RiskAndGuardrails => "risk_and_guardrails",
            Self::Override => "override",
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
        }
    }
}

/// Terminal value of one pipeline run. Never mutated after construction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub allowed: bool,
    pub override_required: bool,
    pub reasons: Vec<String>,
    pub findings: Vec<GuardrailFinding>,
    pub exercised_overrides: Vec<String>,
    pub terminal_stage: ValidationStage,
    pub stage_trail: Vec<ValidationStage>,
}

impl ValidationOutcome {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            override_required: false,
            reasons: Vec::new(),
            findings: Vec::new(),
            exercised_overrides: Vec::new(),
            terminal_stage: ValidationStage::Allowed,
            stage_trail: vec![ValidationStage::Start, ValidationStage::Allowed],
        }
    }

    pub fn blocked(reasons: Vec<String>) -> Self {
        Self {
            allowed: false,
            override_required: false,
            reasons,
            findings: Vec::new(),
            exercised_overrides: Vec::new(),
            terminal_stage: ValidationStage::Blocked,
            stage_trail: vec![ValidationStage::Start, ValidationStage::Blocked],
        }
    }

    /// Joined single-string view for callers that expect one reason field.
    pub fn reason(&self) -> Option<String> {
        if self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join("; "))
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ValidationPipeline {
    relevance: RelevancePolicy,
    guardrails: GuardrailConfig,
}

impl ValidationPipeline {
    pub fn new(relevance: RelevancePolicy, guardrails: GuardrailConfig) -> Self {
        Self { relevance, guardrails }
    }

    /// Run all stages over one candidate. Pure apart from audit emission;
    /// `now` is the fallback occurrence time so tests stay deterministic.
    pub fn run<S: AuditSink + ?Sized>(
        &self,
        context: &RequestContext,
        candidate: &PlanCandidate,
        now: DateTime<Utc>,
        audit: &S,
    ) -> ValidationOutcome {
        let mut trail = vec![ValidationStage::Start, ValidationStage::Relevance];

        match self.relevance.evaluate(context) {
            RelevanceDecision::Reject { reason, tag } => {
                trail.push(ValidationStage::Blocked);
                audit.emit(
                    AuditEvent::new(
                        Some(context.tenant_id.clone()),
                        None,
                        context.correlation_id.clone(),
                        "validation.relevance_rejected",
                        AuditCategory::Validation,
                        "validation-pipeline",
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("tag", tag),
                );
                // Relevance failures are not override-able; no guardrail or
                // override evaluation happens on an already-rejected request.
                return ValidationOutcome {
                    allowed: false,
                    override_required: false,
                    reasons: vec![reason],
                    findings: Vec::new(),
                    exercised_overrides: Vec::new(),
                    terminal_stage: ValidationStage::Blocked,
                    stage_trail: trail,
                };
            }
            RelevanceDecision::Bypassed { tag } => {
                audit.emit(
                    AuditEvent::new(
                        Some(context.tenant_id.clone()),
                        None,
                        context.correlation_id.clone(),
                        "validation.relevance_bypassed",
                        AuditCategory::Validation,
                        "validation-pipeline",
                        AuditOutcome::Success,
                    )
                    .with_metadata("tag", tag),
                );
            }
            RelevanceDecision::Pass => {}
        }

        trail.push(ValidationStage::RiskAndGuardrails);
        let findings = self.guardrails.evaluate(context, candidate, now);

        if GuardrailConfig::overall_severity(&findings) == GuardrailSeverity::Critical {
            trail.push(ValidationStage::Blocked);
            let reasons: Vec<String> = findings
                .iter()
                .filter(|finding| finding.severity == GuardrailSeverity::Critical)
                .map(|finding| finding.detail.clone())
                .collect();
            audit.emit(
                AuditEvent::new(
                    Some(context.tenant_id.clone()),
                    None,
                    context.correlation_id.clone(),
                    "validation.guardrail_blocked",
                    AuditCategory::Validation,
                    "validation-pipeline",
                    AuditOutcome::Rejected,
                )
                .with_metadata("reasons", reasons.join("; ")),
            );
            return ValidationOutcome {
                allowed: false,
                override_required: false,
                reasons,
                findings,
                exercised_overrides: Vec::new(),
                terminal_stage: ValidationStage::Blocked,
                stage_trail: trail,
            };
        }

        let override_required = findings.iter().any(|finding| finding.risk_class.is_some());
        if !override_required {
            trail.push(ValidationStage::Allowed);
            return ValidationOutcome {
                allowed: true,
                override_required: false,
                reasons: Vec::new(),
                findings,
                exercised_overrides: Vec::new(),
                terminal_stage: ValidationStage::Allowed,
                stage_trail: trail,
            };
        }

        trail.push(ValidationStage::Override);
        let resolution = overrides::resolve(context, &findings, audit);
        let terminal =
            if resolution.allowed { ValidationStage::Allowed } else { ValidationStage::Blocked };
        trail.push(terminal);

        ValidationOutcome {
            allowed: resolution.allowed,
            override_required: true,
            reasons: resolution.reasons,
            findings,
            exercised_overrides: resolution.exercised,
            terminal_stage: terminal,
            stage_trail: trail,
        }
    }
}
