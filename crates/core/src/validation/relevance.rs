//! Relevance stage: privacy-sensitive content is rejected outright
//! unless the caller pre-declared the bypass flag. Relevance rejections
//! are not override-able; they short-circuit the rest of the pipeline.

use serde::{Deserialize, Serialize};

use crate::domain::context::{ParamValue, RequestContext};

/// Override key that suppresses the privacy-tag rejection. Must be set
/// explicitly by the caller; there is no post-hoc override path.
pub const BYPASS_PERSONAL_DATA: &str = "bypass_personal_data";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevancePolicy {
    pub privacy_tags: Vec<String>,
}

impl Default for RelevancePolicy {
    fn default() -> Self {
        Self { privacy_tags: vec!["PERSONAL".to_owned(), "CONFIDENTIAL".to_owned()] }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelevanceDecision {
    Pass,
    Bypassed { tag: String },
    Reject { tag: String, reason: String },
}

impl RelevancePolicy {
    pub fn evaluate(&self, context: &RequestContext) -> RelevanceDecision {
        // Missing tags mean "no personal data", never an error.
        let Some(tag) = self.first_privacy_tag(context) else {
            return RelevanceDecision::Pass;
        };

        if context.override_enabled(BYPASS_PERSONAL_DATA) {
            return RelevanceDecision::Bypassed { tag };
        }

        RelevanceDecision::Reject {
            reason: format!(
                "request carries privacy-sensitive tag `{tag}` and no pre-declared bypass"
            ),
            tag,
        }
    }

    fn first_privacy_tag(&self, context: &RequestContext) -> Option<String> {
        for value in context.parameters.values() {
            match value {
                ParamValue::Text(text) => {
                    if let Some(tag) = self.match_tag(text) {
                        return Some(tag);
                    }
                }
                ParamValue::TextList(values) => {
                    for text in values {
                        if let Some(tag) = self.match_tag(text) {
                            return Some(tag);
                        }
                    }
                }
                ParamValue::Number(_) | ParamValue::Flag(_) => {}
            }
        }
        None
    }

    fn match_tag(&self, value: &str) -> Option<String> {
        let candidate = value.trim();
        self.privacy_tags
            .iter()
            .find(|tag| tag.eq_ignore_ascii_case(candidate))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::domain::context::{
        Channel, OrgId, ParamValue, RequestContext, RiskBand, TenantId,
    };

    use super::{RelevanceDecision, RelevancePolicy, BYPASS_PERSONAL_DATA};

    fn context(tags: Vec<&str>, bypass: bool) -> RequestContext {
        let mut overrides = BTreeMap::new();
        if bypass {
            overrides.insert(BYPASS_PERSONAL_DATA.to_owned(), true);
        }
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
                "tags".to_owned(),
                ParamValue::TextList(tags.into_iter().map(str::to_owned).collect()),
            )]),
            overrides,
            occurred_at: None,
            correlation_id: "corr-1".to_owned(),
        }
    }

    #[test]
    fn personal_tag_without_bypass_rejects() {
        let policy = RelevancePolicy::default();
        let decision = policy.evaluate(&context(vec!["PERSONAL"], false));
        assert!(matches!(decision, RelevanceDecision::Reject { ref tag, .. } if tag == "PERSONAL"));
    }

    #[test]
    fn personal_tag_with_bypass_passes() {
        let policy = RelevancePolicy::default();
        let decision = policy.evaluate(&context(vec!["personal"], true));
        assert!(matches!(decision, RelevanceDecision::Bypassed { ref tag } if tag == "PERSONAL"));
    }

    #[test]
    fn untagged_request_passes() {
        let policy = RelevancePolicy::default();
        assert_eq!(policy.evaluate(&context(vec!["routine"], false)), RelevanceDecision::Pass);
    }

    #[test]
    fn empty_parameter_map_passes() {
        let policy = RelevancePolicy::default();
        let mut ctx = context(vec![], false);
        ctx.parameters.clear();
        assert_eq!(policy.evaluate(&ctx), RelevanceDecision::Pass);
    }
}
