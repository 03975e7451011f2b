//! String-level entry points used by callers that hold the rule in its wire
//! form, such as stored templates and HTTP payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::describe::describe_rule;
use crate::error::RuleError;
use crate::rule::RecurrenceRule;

pub const INVALID_DESCRIPTION: &str = "Invalid recurrence pattern";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn parse(text: &str) -> Result<RecurrenceRule, RuleError> {
    text.parse()
}

pub fn validate(text: &str) -> Validation {
    match parse(text) {
        Ok(_) => Validation {
            valid: true,
            error: None,
        },
        Err(err) => Validation {
            valid: false,
            error: Some(err.to_string()),
        },
    }
}

pub fn describe(text: &str, anchor: Option<DateTime<Utc>>) -> String {
    match parse(text) {
        Ok(rule) => describe_rule(&rule, anchor),
        Err(_) => INVALID_DESCRIPTION.to_string(),
    }
}

/// Earliest occurrence strictly after `after`, defaulting to now.
pub fn next_occurrence(
    text: &str,
    anchor: DateTime<Utc>,
    after: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let rule = parse(text).ok()?;
    rule.after(anchor, after.unwrap_or_else(Utc::now))
}

/// Inclusive window expansion. Invalid rules produce no occurrences.
pub fn occurrences_between(
    text: &str,
    anchor: DateTime<Utc>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    match parse(text) {
        Ok(rule) => rule.between(anchor, from, to),
        Err(err) => {
            debug!(rule = text, error = %err, "skipping expansion of invalid rule");
            Vec::new()
        }
    }
}
