//! Lightweight PII scanning shared by guardrail checks and trace
//! snapshot redaction. Heuristic by design: emails, long digit runs
//! (phone numbers, SSN-shaped values) and explicit PII tags.

use std::collections::BTreeMap;

use crate::domain::context::ParamValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PiiKind {
    Email,
    PhoneLike,
}

impl PiiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::PhoneLike => "phone",
        }
    }
}

/// Scan a single text value for PII-shaped content.
pub fn scan_text(value: &str) -> Option<PiiKind> {
    if looks_like_email(value) {
        return Some(PiiKind::Email);
    }
    if contains_long_digit_run(value) {
        return Some(PiiKind::PhoneLike);
    }
    None
}

/// Scan every text-bearing parameter; returns the keys that matched with
/// the kind of PII found.
pub fn scan_parameters(parameters: &BTreeMap<String, ParamValue>) -> Vec<(String, PiiKind)> {
    let mut findings = Vec::new();
    for (key, value) in parameters {
        match value {
            ParamValue::Text(text) => {
                if let Some(kind) = scan_text(text) {
                    findings.push((key.clone(), kind));
                }
            }
            ParamValue::TextList(values) => {
                if let Some(kind) = values.iter().find_map(|text| scan_text(text)) {
                    findings.push((key.clone(), kind));
                }
            }
            ParamValue::Number(_) | ParamValue::Flag(_) => {}
        }
    }
    findings
}

/// Produce a parameter snapshot safe for durable storage. Matched values
/// are replaced wholesale; partial masking is not worth the risk of a
/// missed span.
pub fn redact_parameters(
    parameters: &BTreeMap<String, ParamValue>,
) -> BTreeMap<String, ParamValue> {
    parameters
        .iter()
        .map(|(key, value)| (key.clone(), redact_value(value)))
        .collect()
}

/// Redact one free-text value. Also applied to step arguments before a
/// trace is persisted.
pub fn redact_text(value: &str) -> String {
    match scan_text(value) {
        Some(kind) => format!("[redacted:{}]", kind.as_str()),
        None => value.to_owned(),
    }
}

fn redact_value(value: &ParamValue) -> ParamValue {
    match value {
        ParamValue::Text(text) => ParamValue::Text(redact_text(text)),
        ParamValue::TextList(values) => {
            ParamValue::TextList(values.iter().map(|text| redact_text(text)).collect())
        }
        ParamValue::Number(_) | ParamValue::Flag(_) => value.clone(),
    }
}

fn looks_like_email(value: &str) -> bool {
    value.split_whitespace().any(|token| {
        let Some(at) = token.find('@') else {
            return false;
        };
        let (local, domain) = token.split_at(at);
        !local.is_empty() && domain.len() > 1 && domain[1..].contains('.')
    })
}

fn contains_long_digit_run(value: &str) -> bool {
    let mut run = 0usize;
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            run += 1;
            if run >= 7 {
                return true;
            }
        } else if !matches!(ch, '-' | ' ' | '(' | ')' | '+' | '.') {
            run = 0;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::domain::context::ParamValue;

    use super::{redact_parameters, scan_parameters, scan_text, PiiKind};

    #[test]
    fn detects_email_addresses() {
        assert_eq!(scan_text("reach me at dana@example.com please"), Some(PiiKind::Email));
        assert_eq!(scan_text("no pii here"), None);
    }

    #[test]
    fn detects_phone_shaped_digit_runs() {
        assert_eq!(scan_text("call +1 (555) 010-2345"), Some(PiiKind::PhoneLike));
        assert_eq!(scan_text("order 123 of 456"), None);
    }

    #[test]
    fn redaction_replaces_matched_values_only() {
        let parameters = BTreeMap::from([
            ("note".to_owned(), ParamValue::Text("email dana@example.com".to_owned())),
            ("topic".to_owned(), ParamValue::Text("renewal".to_owned())),
            ("attempts".to_owned(), ParamValue::Number(2.0)),
        ]);

        let redacted = redact_parameters(&parameters);

        assert_eq!(redacted["note"], ParamValue::Text("[redacted:email]".to_owned()));
        assert_eq!(redacted["topic"], ParamValue::Text("renewal".to_owned()));
        assert_eq!(redacted["attempts"], ParamValue::Number(2.0));
    }

    #[test]
    fn scan_covers_text_lists() {
        let parameters = BTreeMap::from([(
            "recipients".to_owned(),
            ParamValue::TextList(vec!["ok".to_owned(), "dana@example.com".to_owned()]),
        )]);

        let findings = scan_parameters(&parameters);
        assert_eq!(findings, vec![("recipients".to_owned(), PiiKind::Email)]);
    }
}
