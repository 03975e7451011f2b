//! RFC 5545 recurrence rules: parsing, validation, English descriptions and
//! lazy expansion into UTC occurrences.

pub mod describe;
pub mod engine;
pub mod error;
pub mod expand;
pub mod patterns;
pub mod rule;
pub mod set;

pub use describe::describe_rule;
pub use engine::{
    INVALID_DESCRIPTION, Validation, describe, next_occurrence, occurrences_between, parse,
    validate,
};
pub use error::RuleError;
pub use expand::Occurrences;
pub use patterns::{CommonPattern, common_patterns};
pub use rule::{Frequency, RecurrenceRule, WeekdaySpec};
pub use set::RecurrenceSet;
