use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Phone,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::InApp => "in_app",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sms" => Some(Self::Sms),
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            "in_app" => Some(Self::InApp),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBand {
    Low,
    Standard,
    Elevated,
    High,
}

impl RiskBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Standard => "standard",
            Self::Elevated => "elevated",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "standard" => Some(Self::Standard),
            "elevated" => Some(Self::Elevated),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Typed parameter value. Validation checks stay exhaustively matchable
/// instead of inspecting dynamic JSON at runtime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Text(String),
    Number(f64),
    Flag(bool),
    TextList(Vec<String>),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Canonical representation used for fingerprint hashing. Numbers with
    /// no fractional part collapse to integers, strings are case-folded and
    /// trimmed, so semantically identical inputs hash identically.
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(value) => format!("s:{}", value.trim().to_lowercase()),
            Self::Number(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    format!("n:{}", *value as i64)
                } else {
                    format!("n:{value}")
                }
            }
            Self::Flag(value) => format!("b:{value}"),
            Self::TextList(values) => {
                let folded: Vec<String> =
                    values.iter().map(|value| value.trim().to_lowercase()).collect();
                format!("l:[{}]", folded.join(","))
            }
        }
    }

    /// Plain rendering used when a value is substituted into a step
    /// argument, and when promotion maps argument text back to a
    /// `{{key}}` placeholder. Must stay symmetric with itself.
    pub fn render(&self) -> String {
        match self {
            Self::Text(value) => value.clone(),
            Self::Number(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    format!("{}", *value as i64)
                } else {
                    format!("{value}")
                }
            }
            Self::Flag(value) => value.to_string(),
            Self::TextList(values) => values.join(","),
        }
    }
}

/// Immutable per-request identity and intent context. Owned by the
/// orchestrator for the lifetime of one decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant_id: TenantId,
    pub organization_id: OrgId,
    pub user_id: Option<UserId>,
    pub contact_id: Option<ContactId>,
    pub action_type: String,
    pub channel: Channel,
    pub industry: String,
    pub risk_band: RiskBand,
    pub parameters: BTreeMap<String, ParamValue>,
    pub overrides: BTreeMap<String, bool>,
    /// Raw caller-supplied occurrence timestamp. Parsed leniently during
    /// validation; malformed values fall back to the evaluation time.
    pub occurred_at: Option<String>,
    pub correlation_id: String,
}

impl RequestContext {
    /// Tenant and organization identifiers must be present before any
    /// lookup runs; proceeding without them is a tenant-isolation risk.
    pub fn ensure_tenancy(&self) -> Result<(), DomainError> {
        if self.tenant_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "request context is missing a tenant id".to_owned(),
            ));
        }
        if self.organization_id.0.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "request context is missing an organization id".to_owned(),
            ));
        }
        if self.action_type.trim().is_empty() {
            return Err(DomainError::InvariantViolation(
                "request context is missing an action type".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn override_enabled(&self, key: &str) -> bool {
        self.overrides.get(key).copied().unwrap_or(false)
    }
}
