use std::collections::BTreeMap;

use async_trait::async_trait;

use reflex_core::domain::context::{Channel, ParamValue, RequestContext};
use reflex_core::domain::plan::{BoundStep, PlannedExecution};
use reflex_core::domain::procedure::StepKind;
use reflex_core::domain::trace::TraceId;
use reflex_core::errors::ApplicationError;

/// Pluggable plan proposer. Implementations translate a request context
/// into ordered steps; they never execute anything and their output always
/// passes through the validation pipeline.
#[async_trait]
pub trait PlannerGateway: Send + Sync {
    async fn plan(
        &self,
        context: &RequestContext,
        trace_id: &TraceId,
    ) -> Result<PlannedExecution, ApplicationError>;
}

/// Deterministic rule-based planner. Stands in for a hosted model behind
/// the same trait, which keeps decisions reproducible in tests and in
/// air-gapped deployments.
#[derive(Clone, Debug, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlannerGateway for HeuristicPlanner {
    async fn plan(
        &self,
        context: &RequestContext,
        trace_id: &TraceId,
    ) -> Result<PlannedExecution, ApplicationError> {
        let mut steps = vec![outreach_step(context)];
        steps.push(BoundStep {
            kind: StepKind::LogInteraction,
            name: "log outreach".to_owned(),
            args: BTreeMap::from([
                ("action_type".to_owned(), context.action_type.clone()),
                ("channel".to_owned(), context.channel.as_str().to_owned()),
            ]),
        });

        Ok(PlannedExecution {
            trace_id: trace_id.clone(),
            steps,
            confidence: confidence_score(context),
            grounding_score: grounding_score(context),
        })
    }
}

fn outreach_step(context: &RequestContext) -> BoundStep {
    let body = text_param(context, "body")
        .or_else(|| text_param(context, "message"))
        .unwrap_or_else(|| default_body(context));

    match context.channel {
        Channel::Sms => BoundStep {
            kind: StepKind::SendSms,
            name: "send sms".to_owned(),
            args: BTreeMap::from([
                ("to".to_owned(), text_param(context, "phone").unwrap_or_default()),
                ("body".to_owned(), body),
            ]),
        },
        Channel::Email => BoundStep {
            kind: StepKind::SendEmail,
            name: "send email".to_owned(),
            args: BTreeMap::from([
                ("to".to_owned(), text_param(context, "email").unwrap_or_default()),
                (
                    "subject".to_owned(),
                    text_param(context, "subject")
                        .unwrap_or_else(|| format!("Re: {}", context.action_type)),
                ),
                ("body".to_owned(), body),
            ]),
        },
        Channel::Phone => BoundStep {
            kind: StepKind::CreateTask,
            name: "schedule call".to_owned(),
            args: BTreeMap::from([
                ("title".to_owned(), format!("Call about {}", context.action_type)),
                (
                    "contact".to_owned(),
                    context.contact_id.as_ref().map(|id| id.0.clone()).unwrap_or_default(),
                ),
            ]),
        },
        Channel::InApp => BoundStep {
            kind: StepKind::LogInteraction,
            name: "post in-app notification".to_owned(),
            args: BTreeMap::from([("body".to_owned(), body)]),
        },
    }
}

fn default_body(context: &RequestContext) -> String {
    match text_param(context, "first_name") {
        Some(first_name) => format!("Hi {first_name}, following up on {}", context.action_type),
        None => format!("Following up on {}", context.action_type),
    }
}

fn text_param(context: &RequestContext, key: &str) -> Option<String> {
    match context.parameters.get(key) {
        Some(ParamValue::Text(value)) if !value.trim().is_empty() => Some(value.clone()),
        _ => None,
    }
}

/// Scores how well the context supports the produced plan. Additive over
/// observed signals, clamped well below 1.0 so a heuristic plan is never
/// mistaken for a certain one.
fn confidence_score(context: &RequestContext) -> f64 {
    let mut score: f64 = 0.35;

    let address_key = match context.channel {
        Channel::Sms => Some("phone"),
        Channel::Email => Some("email"),
        Channel::Phone | Channel::InApp => None,
    };
    if address_key.map_or(true, |key| text_param(context, key).is_some()) {
        score += 0.2;
    }
    if text_param(context, "body").is_some() || text_param(context, "message").is_some() {
        score += 0.15;
    }
    if text_param(context, "first_name").is_some() {
        score += 0.1;
    }
    if context.contact_id.is_some() {
        score += 0.1;
    }

    score.min(0.9)
}

/// Fraction of parameters the planner actually recognized and used; None
/// when there was nothing to ground against.
fn grounding_score(context: &RequestContext) -> Option<f64> {
    if context.parameters.is_empty() {
        return None;
    }

    const RECOGNIZED: &[&str] =
        &["body", "message", "email", "first_name", "phone", "subject", "tags"];
    let recognized = context
        .parameters
        .keys()
        .filter(|key| RECOGNIZED.contains(&key.as_str()))
        .count();
    Some(recognized as f64 / context.parameters.len() as f64)
}
