use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context::{ParamValue, TenantId};
use crate::domain::trace::TraceId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcedureId(pub String);

impl ProcedureId {
    pub fn generate() -> Self {
        Self(format!("proc-{}", uuid::Uuid::new_v4()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    SendSms,
    SendEmail,
    CreateTask,
    LogInteraction,
    UpdateField,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendSms => "send_sms",
            Self::SendEmail => "send_email",
            Self::CreateTask => "create_task",
            Self::LogInteraction => "log_interaction",
            Self::UpdateField => "update_field",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "send_sms" => Some(Self::SendSms),
            "send_email" => Some(Self::SendEmail),
            "create_task" => Some(Self::CreateTask),
            "log_interaction" => Some(Self::LogInteraction),
            "update_field" => Some(Self::UpdateField),
            _ => None,
        }
    }
}

/// One reusable step of a procedure. Argument templates may reference
/// request parameters with `{{key}}` placeholders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcedureStep {
    pub kind: StepKind,
    pub name: String,
    pub arg_template: BTreeMap<String, String>,
}

/// A named, tenant-owned, versioned plan. Versions are immutable once
/// created: edits produce version N+1, never mutate N.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: ProcedureId,
    pub tenant_id: TenantId,
    pub fingerprint: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcedureVersion {
    pub procedure_id: ProcedureId,
    pub version: u32,
    pub steps: Vec<ProcedureStep>,
    pub requires_validation: bool,
    pub deprecated: bool,
    pub promoted_from_trace_id: TraceId,
    pub promoted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionOptions {
    /// Display name for a procedure minted by this promotion. Ignored when
    /// the fingerprint already has a procedure (a new version is added).
    pub name: Option<String>,
    pub requires_validation: bool,
}

/// Replay candidate as read from the store: a concrete version plus the
/// success statistics recorded in its traces.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayCandidate {
    pub procedure: Procedure,
    pub version: ProcedureVersion,
    pub trace_successes: u64,
    pub trace_attempts: u64,
}

impl ReplayCandidate {
    /// Observed success rate across captured traces. A candidate with no
    /// execution history scores 0.0 rather than being treated as perfect.
    pub fn success_rate(&self) -> f64 {
        if self.trace_attempts == 0 {
            return 0.0;
        }
        self.trace_successes as f64 / self.trace_attempts as f64
    }
}

/// Bind a step's argument template against concrete request parameters.
/// Unresolved placeholders are left intact so they can be flagged by
/// validation rather than silently dropped.
pub fn bind_arguments(
    template: &BTreeMap<String, String>,
    parameters: &BTreeMap<String, ParamValue>,
) -> BTreeMap<String, String> {
    template
        .iter()
        .map(|(key, value)| (key.clone(), substitute_placeholders(value, parameters)))
        .collect()
}

fn substitute_placeholders(template: &str, parameters: &BTreeMap<String, ParamValue>) -> String {
    let mut output = template.to_string();
    for (key, value) in parameters {
        output = output.replace(&format!("{{{{{key}}}}}"), &value.render());
    }
    output
}
