//! The fixed decision grammar: `"I chose X because Y. This affects Z."`
//!
//! All three fields are required; anything else is rejected so the journal
//! only ever holds decisions that downstream tasks can actually consume.

use crate::{MarcusError, Result};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecision {
    pub what: String,
    pub why: String,
    pub affects: String,
}

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*I\s+chose\s+(?P<what>.+?)\s+because\s+(?P<why>.+?)\.\s*This\s+affects\s+(?P<affects>.+?)\.?\s*$",
        )
        .expect("decision grammar must compile")
    })
}

pub fn parse(text: &str) -> Result<ParsedDecision> {
    let captures = grammar().captures(text).ok_or_else(|| {
        MarcusError::MalformedDecision(
            "expected the shape \"I chose X because Y. This affects Z.\"".to_string(),
        )
    })?;

    let field = |name: &str| -> Result<String> {
        let value = captures
            .name(name)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        if value.is_empty() {
            return Err(MarcusError::MalformedDecision(format!(
                "decision field {name:?} is empty"
            )));
        }
        Ok(value)
    };

    Ok(ParsedDecision {
        what: field("what")?,
        why: field("why")?,
        affects: field("affects")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_decision_parses_into_three_fields() {
        let parsed =
            parse("I chose PostgreSQL because we need ACID. This affects all data models.")
                .unwrap();
        assert_eq!(parsed.what, "PostgreSQL");
        assert_eq!(parsed.why, "we need ACID");
        assert_eq!(parsed.affects, "all data models");
    }

    #[test]
    fn missing_affects_clause_is_malformed() {
        let err = parse("Using PostgreSQL").unwrap_err();
        assert!(matches!(err, MarcusError::MalformedDecision(_)));

        let err = parse("I chose PostgreSQL because we need ACID.").unwrap_err();
        assert!(matches!(err, MarcusError::MalformedDecision(_)));
    }

    #[test]
    fn trailing_period_on_affects_is_optional() {
        let parsed =
            parse("I chose Redis because latency matters. This affects the cache layer").unwrap();
        assert_eq!(parsed.affects, "the cache layer");
    }

    #[test]
    fn case_and_surrounding_whitespace_are_forgiven() {
        let parsed =
            parse("  i chose gRPC because contracts help. this affects service boundaries.  ")
                .unwrap();
        assert_eq!(parsed.what, "gRPC");
    }
}
