use chrono::Weekday;
use serde::Serialize;

use crate::rule::{Frequency, RecurrenceRule, WeekdaySpec};

/// A named schedule offered as a starting point when setting up a template.
#[derive(Debug, Clone, Serialize)]
pub struct CommonPattern {
    pub name: &'static str,
    pub description: &'static str,
    pub rule: RecurrenceRule,
}

pub fn common_patterns() -> Vec<CommonPattern> {
    let pattern = |name, description, rule| CommonPattern {
        name,
        description,
        rule,
    };

    vec![
        pattern("Daily", "Every day", RecurrenceRule::new(Frequency::Daily)),
        pattern("Weekly", "Every week", RecurrenceRule::new(Frequency::Weekly)),
        pattern(
            "Bi-weekly",
            "Every 2 weeks",
            RecurrenceRule::new(Frequency::Weekly).with_interval(2),
        ),
        pattern("Monthly", "Every month", RecurrenceRule::new(Frequency::Monthly)),
        pattern(
            "Quarterly",
            "Every 3 months",
            RecurrenceRule::new(Frequency::Monthly).with_interval(3),
        ),
        pattern(
            "Semi-annually",
            "Every 6 months",
            RecurrenceRule::new(Frequency::Monthly).with_interval(6),
        ),
        pattern("Annually", "Every year", RecurrenceRule::new(Frequency::Yearly)),
        pattern(
            "Weekdays",
            "Monday through Friday",
            RecurrenceRule::new(Frequency::Weekly).with_weekdays(
                [Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
                    .map(WeekdaySpec::every),
            ),
        ),
        pattern(
            "First of month",
            "First day of every month",
            RecurrenceRule::new(Frequency::Monthly).with_month_days([1]),
        ),
        pattern(
            "Last of month",
            "Last day of every month",
            RecurrenceRule::new(Frequency::Monthly).with_month_days([-1]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_round_trips_through_the_parser() {
        for pattern in common_patterns() {
            assert!(pattern.rule.check().is_ok(), "{}", pattern.name);
            let reparsed: RecurrenceRule = pattern.rule.to_string().parse().unwrap();
            assert_eq!(reparsed, pattern.rule, "{}", pattern.name);
        }
    }

    #[test]
    fn quarterly_is_every_three_months() {
        let quarterly = common_patterns()
            .into_iter()
            .find(|pattern| pattern.name == "Quarterly")
            .unwrap();
        assert_eq!(quarterly.rule.to_string(), "FREQ=MONTHLY;INTERVAL=3");
    }
}
