use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};

use crate::rule::RecurrenceRule;

/// Several rules sharing one anchor, minus excluded calendar dates, plus
/// explicitly added instants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecurrenceSet {
    rules: Vec<RecurrenceRule>,
    excluded: BTreeSet<NaiveDate>,
    added: BTreeSet<DateTime<Utc>>,
}

impl RecurrenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: RecurrenceRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn excluding(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.excluded.extend(dates);
        self
    }

    pub fn including(mut self, instants: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.added.extend(instants);
        self
    }

    pub fn rules(&self) -> &[RecurrenceRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.added.is_empty()
    }

    /// Ascending, de-duplicated occurrences inside `[from, to]`. Exclusions
    /// match on the UTC calendar date and also remove added instants.
    pub fn between(
        &self,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        self.first_between(anchor, from, to, usize::MAX)
    }

    /// The first `limit` results of [`between`](Self::between). Expansion
    /// stops once each rule has produced `limit` kept occurrences.
    pub fn first_between(
        &self,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Vec<DateTime<Utc>> {
        if from > to || limit == 0 {
            return Vec::new();
        }

        let kept = |at: &DateTime<Utc>| !self.excluded.contains(&at.date_naive());
        let mut merged: BTreeSet<DateTime<Utc>> = BTreeSet::new();
        for rule in &self.rules {
            merged.extend(rule.window(anchor, from, to).filter(kept).take(limit));
        }
        merged.extend(self.added.range(from..=to).copied().filter(kept).take(limit));
        merged.into_iter().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn unions_rules_without_duplicates() {
        let set = RecurrenceSet::new()
            .with_rule("FREQ=WEEKLY;BYDAY=MO".parse().unwrap())
            .with_rule("FREQ=MONTHLY;BYMONTHDAY=1".parse().unwrap());

        // 2025-12-01 is both a Monday and the 1st.
        let found = set.between(at(2025, 12, 1), at(2025, 12, 1), at(2025, 12, 31));
        assert_eq!(
            found,
            vec![
                at(2025, 12, 1),
                at(2025, 12, 8),
                at(2025, 12, 15),
                at(2025, 12, 22),
                at(2025, 12, 29)
            ]
        );
    }

    #[test]
    fn applies_exclusions_and_additions() {
        let set = RecurrenceSet::new()
            .with_rule("FREQ=WEEKLY".parse().unwrap())
            .excluding([NaiveDate::from_ymd_opt(2025, 12, 8).unwrap()])
            .including([at(2025, 12, 10), at(2026, 3, 1)]);

        let found = set.between(at(2025, 12, 1), at(2025, 12, 1), at(2025, 12, 21));
        assert_eq!(found, vec![at(2025, 12, 1), at(2025, 12, 10), at(2025, 12, 15)]);
    }

    #[test]
    fn exclusions_also_remove_additions() {
        let set = RecurrenceSet::new()
            .including([at(2025, 12, 10)])
            .excluding([NaiveDate::from_ymd_opt(2025, 12, 10).unwrap()]);
        assert!(set.between(at(2025, 12, 1), at(2025, 12, 1), at(2025, 12, 31)).is_empty());
    }

    #[test]
    fn reversed_window_is_empty() {
        let set = RecurrenceSet::new().including([at(2025, 12, 10)]);
        assert!(set.between(at(2025, 12, 1), at(2025, 12, 31), at(2025, 12, 1)).is_empty());
    }

    #[test]
    fn limited_expansion_stops_early() {
        let set = RecurrenceSet::new()
            .with_rule("FREQ=DAILY".parse().unwrap())
            .excluding([NaiveDate::from_ymd_opt(2025, 12, 2).unwrap()])
            .including([at(2025, 11, 30)]);
        let far = Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0).unwrap();

        let found = set.first_between(at(2025, 12, 1), at(2025, 11, 1), far, 3);
        assert_eq!(found, vec![at(2025, 11, 30), at(2025, 12, 1), at(2025, 12, 3)]);
        assert!(set.first_between(at(2025, 12, 1), at(2025, 11, 1), far, 0).is_empty());
    }
}
