use thiserror::Error;

/// Reasons a recurrence rule string is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("recurrence rule is empty")]
    Empty,

    #[error("recurrence rule is missing FREQ")]
    MissingFrequency,

    #[error("unknown frequency '{0}', expected DAILY, WEEKLY, MONTHLY or YEARLY")]
    UnknownFrequency(String),

    #[error("malformed rule part '{0}', expected KEY=VALUE")]
    MalformedPart(String),

    #[error("unknown rule property '{0}'")]
    UnknownProperty(String),

    #[error("rule property '{0}' appears more than once")]
    DuplicateProperty(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl RuleError {
    pub(crate) fn invalid(key: &'static str, value: &str, reason: &'static str) -> Self {
        Self::InvalidValue {
            key,
            value: value.to_string(),
            reason,
        }
    }
}
