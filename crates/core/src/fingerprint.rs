//! Deterministic context fingerprinting.
//!
//! The fingerprint is the cache key for procedural replay: identical
//! normalized inputs under the same tenant always collide, different
//! tenants never do (tenant id is always part of the hash input).

use sha2::{Digest, Sha256};

use crate::domain::context::RequestContext;

/// Parameter keys that change on every request and must never feed the
/// hash; including them would make every request a permanent cache miss.
const VOLATILE_KEYS: &[&str] = &["occurred_at", "timestamp", "trace_id", "correlation_id"];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextFingerprint(pub String);

impl ContextFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContextFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure function over the request context. No I/O, no clock access.
pub fn fingerprint(context: &RequestContext) -> ContextFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"tenant=");
    hasher.update(context.tenant_id.0.trim().as_bytes());
    hasher.update(b"|org=");
    hasher.update(context.organization_id.0.trim().as_bytes());
    hasher.update(b"|action=");
    hasher.update(context.action_type.trim().to_lowercase().as_bytes());
    hasher.update(b"|channel=");
    hasher.update(context.channel.as_str().as_bytes());

    // BTreeMap iteration is already key-sorted, so parameter insertion
    // order never influences the digest.
    for (key, value) in &context.parameters {
        if is_volatile(key) {
            continue;
        }
        hasher.update(b"|p:");
        hasher.update(key.trim().to_lowercase().as_bytes());
        hasher.update(b"=");
        hasher.update(value.canonical().as_bytes());
    }

    let digest = hasher.finalize();
    ContextFingerprint(format!("fp-{digest:x}"))
}

fn is_volatile(key: &str) -> bool {
    let key = key.trim().to_ascii_lowercase();
    VOLATILE_KEYS.contains(&key.as_str())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::domain::context::{
        Channel, OrgId, ParamValue, RequestContext, RiskBand, TenantId,
    };

    use super::fingerprint;

    fn context(tenant: &str, parameters: BTreeMap<String, ParamValue>) -> RequestContext {
        RequestContext {
            tenant_id: TenantId(tenant.to_owned()),
            organization_id: OrgId("org-1".to_owned()),
            user_id: None,
            contact_id: None,
            action_type: "send-followup-sms".to_owned(),
            channel: Channel::Sms,
            industry: "insurance".to_owned(),
            risk_band: RiskBand::Standard,
            parameters,
            overrides: BTreeMap::new(),
            occurred_at: None,
            correlation_id: "corr-1".to_owned(),
        }
    }

    #[test]
    fn identical_normalized_inputs_produce_identical_fingerprints() {
        let left = context(
            "t-1",
            BTreeMap::from([
                ("topic".to_owned(), ParamValue::Text("Renewal".to_owned())),
                ("attempts".to_owned(), ParamValue::Number(2.0)),
            ]),
        );
        let right = context(
            "t-1",
            BTreeMap::from([
                ("attempts".to_owned(), ParamValue::Number(2.0)),
                ("topic".to_owned(), ParamValue::Text("  renewal ".to_owned())),
            ]),
        );

        assert_eq!(fingerprint(&left), fingerprint(&right));
    }

    #[test]
    fn different_tenants_never_collide() {
        let parameters =
            BTreeMap::from([("topic".to_owned(), ParamValue::Text("renewal".to_owned()))]);
        let left = context("t-1", parameters.clone());
        let right = context("t-2", parameters);

        assert_ne!(fingerprint(&left), fingerprint(&right));
    }

    #[test]
    fn volatile_keys_are_excluded_from_the_hash() {
        let base = context(
            "t-1",
            BTreeMap::from([("topic".to_owned(), ParamValue::Text("renewal".to_owned()))]),
        );
        let with_volatile = context(
            "t-1",
            BTreeMap::from([
                ("topic".to_owned(), ParamValue::Text("renewal".to_owned())),
                (
                    "occurred_at".to_owned(),
                    ParamValue::Text("2026-08-29T10:00:00Z".to_owned()),
                ),
                ("trace_id".to_owned(), ParamValue::Text("tr-123".to_owned())),
            ]),
        );

        assert_eq!(fingerprint(&base), fingerprint(&with_volatile));
    }

    #[test]
    fn differing_parameters_change_the_fingerprint() {
        let left = context(
            "t-1",
            BTreeMap::from([("topic".to_owned(), ParamValue::Text("renewal".to_owned()))]),
        );
        let right = context(
            "t-1",
            BTreeMap::from([("topic".to_owned(), ParamValue::Text("upsell".to_owned()))]),
        );

        assert_ne!(fingerprint(&left), fingerprint(&right));
    }

    #[test]
    fn integral_number_forms_collide_intentionally() {
        let left =
            context("t-1", BTreeMap::from([("count".to_owned(), ParamValue::Number(3.0))]));
        let right =
            context("t-1", BTreeMap::from([("count".to_owned(), ParamValue::Number(3.00))]));

        assert_eq!(fingerprint(&left), fingerprint(&right));
    }

    #[test]
    fn empty_parameter_map_is_valid() {
        let ctx = context("t-1", BTreeMap::new());
        assert!(fingerprint(&ctx).as_str().starts_with("fp-"));
    }
}
