use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::context::{ParamValue, TenantId};
use crate::domain::procedure::{bind_arguments, ProcedureId, ReplayCandidate, StepKind};
use crate::domain::trace::TraceId;

/// A step with concrete arguments, ready for an executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundStep {
    pub kind: StepKind,
    pub name: String,
    pub args: BTreeMap<String, String>,
}

/// A procedure version materialized for one request. Created by replay
/// lookup, consumed by validation, discarded after execution or
/// rejection — only its trace is persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayPlan {
    pub procedure_id: ProcedureId,
    pub procedure_name: String,
    pub version: u32,
    pub tenant_id: TenantId,
    pub steps: Vec<BoundStep>,
    pub requires_validation: bool,
    /// Observed success rate of this procedure's traces, reused as the
    /// plan confidence during validation.
    pub confidence: f64,
}

impl ReplayPlan {
    pub fn bind(candidate: &ReplayCandidate, parameters: &BTreeMap<String, ParamValue>) -> Self {
        let steps = candidate
            .version
            .steps
            .iter()
            .map(|step| BoundStep {
                kind: step.kind,
                name: step.name.clone(),
                args: bind_arguments(&step.arg_template, parameters),
            })
            .collect();

        Self {
            procedure_id: candidate.procedure.id.clone(),
            procedure_name: candidate.procedure.name.clone(),
            version: candidate.version.version,
            tenant_id: candidate.procedure.tenant_id.clone(),
            steps,
            requires_validation: candidate.version.requires_validation,
            confidence: candidate.success_rate(),
        }
    }
}

/// The planner-gateway analog of a replay plan: a trace id plus the steps
/// the planner proposed. Invoked at most once by the orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannedExecution {
    pub trace_id: TraceId,
    pub steps: Vec<BoundStep>,
    pub confidence: f64,
    /// Present when the plan was derived from retrieved context.
    pub grounding_score: Option<f64>,
}

/// Uniform view over the two plan shapes so validation stages match on an
/// explicit variant instead of probing types at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanCandidate {
    Replay(ReplayPlan),
    Planned(PlannedExecution),
}

impl PlanCandidate {
    pub fn confidence(&self) -> f64 {
        match self {
            Self::Replay(plan) => plan.confidence,
            Self::Planned(plan) => plan.confidence,
        }
    }

    pub fn grounding_score(&self) -> Option<f64> {
        match self {
            Self::Replay(_) => None,
            Self::Planned(plan) => plan.grounding_score,
        }
    }

    pub fn steps(&self) -> &[BoundStep] {
        match self {
            Self::Replay(plan) => &plan.steps,
            Self::Planned(plan) => &plan.steps,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replay(_))
    }

    pub fn procedure(&self) -> Option<(&ProcedureId, u32)> {
        match self {
            Self::Replay(plan) => Some((&plan.procedure_id, plan.version)),
            Self::Planned(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use crate::domain::context::{ParamValue, TenantId};
    use crate::domain::procedure::{
        Procedure, ProcedureId, ProcedureStep, ProcedureVersion, ReplayCandidate, StepKind,
    };
    use crate::domain::trace::TraceId;

    use super::{PlanCandidate, PlannedExecution, ReplayPlan};

    fn candidate() -> ReplayCandidate {
        ReplayCandidate {
            procedure: Procedure {
                id: ProcedureId("proc-1".to_owned()),
                tenant_id: TenantId("t-1".to_owned()),
                fingerprint: "fp-abc".to_owned(),
                name: "followup-sms".to_owned(),
                created_at: Utc::now(),
            },
            version: ProcedureVersion {
                procedure_id: ProcedureId("proc-1".to_owned()),
                version: 3,
                steps: vec![ProcedureStep {
                    kind: StepKind::SendSms,
                    name: "send followup".to_owned(),
                    arg_template: BTreeMap::from([(
                        "body".to_owned(),
                        "Hi {{first_name}}".to_owned(),
                    )]),
                }],
                requires_validation: true,
                deprecated: false,
                promoted_from_trace_id: TraceId("tr-src".to_owned()),
                promoted_at: Utc::now(),
            },
            trace_successes: 9,
            trace_attempts: 10,
        }
    }

    #[test]
    fn replay_plan_binds_steps_and_carries_success_rate() {
        let parameters =
            BTreeMap::from([("first_name".to_owned(), ParamValue::Text("Dana".to_owned()))]);
        let plan = ReplayPlan::bind(&candidate(), &parameters);

        assert_eq!(plan.version, 3);
        assert_eq!(plan.steps[0].args["body"], "Hi Dana");
        assert!((plan.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn candidate_accessors_cover_both_variants() {
        let replay = PlanCandidate::Replay(ReplayPlan::bind(&candidate(), &BTreeMap::new()));
        let planned = PlanCandidate::Planned(PlannedExecution {
            trace_id: TraceId("tr-1".to_owned()),
            steps: Vec::new(),
            confidence: 0.4,
            grounding_score: Some(0.8),
        });

        assert!(replay.is_replay());
        assert_eq!(replay.grounding_score(), None);
        assert_eq!(replay.procedure().map(|(id, version)| (id.0.as_str(), version)),
            Some(("proc-1", 3)));
        assert!(!planned.is_replay());
        assert_eq!(planned.grounding_score(), Some(0.8));
        assert!((planned.confidence() - 0.4).abs() < f64::EPSILON);
    }
}
