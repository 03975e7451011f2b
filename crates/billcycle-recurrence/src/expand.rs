use std::collections::VecDeque;
use std::iter::FusedIterator;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc, Weekday};

use crate::rule::{Frequency, RecurrenceRule, WeekdaySpec};

/// Unbounded searches give up once this many years pass without a hit.
const SEARCH_HORIZON_MONTHS: u32 = 400 * 12;

/// Lazy, ascending expansion of a rule from its anchor.
///
/// Every call to [`RecurrenceRule::occurrences`] builds a fresh iterator, so
/// repeated expansions of the same rule always agree.
#[derive(Debug, Clone)]
pub struct Occurrences<'a> {
    rule: &'a RecurrenceRule,
    anchor: DateTime<Utc>,
    anchor_date: NaiveDate,
    time: NaiveTime,
    period: u64,
    pending: VecDeque<NaiveDate>,
    emitted: u32,
    last_hit: NaiveDate,
    limit: Option<NaiveDate>,
    finished: bool,
}

impl<'a> Occurrences<'a> {
    fn new(rule: &'a RecurrenceRule, anchor: DateTime<Utc>) -> Self {
        let anchor_date = anchor.date_naive();
        Self {
            rule,
            anchor,
            anchor_date,
            time: anchor.time(),
            period: 0,
            pending: VecDeque::new(),
            emitted: 0,
            last_hit: anchor_date,
            limit: None,
            finished: false,
        }
    }

    /// Stops expanding once a period starts after `limit`.
    fn bounded_by(mut self, limit: DateTime<Utc>) -> Self {
        self.limit = Some(limit.date_naive());
        self
    }

    /// Jumps close to `from` when no COUNT forces counting from the anchor.
    fn starting_near(mut self, from: DateTime<Utc>) -> Self {
        if self.rule.count.is_some() || from <= self.anchor {
            return self;
        }
        let from_date = from.date_naive();
        let interval = u64::from(self.rule.interval.max(1));
        let elapsed = match self.rule.frequency {
            Frequency::Daily => (from_date - self.anchor_date).num_days(),
            Frequency::Weekly => {
                let start = week_start(self.anchor_date, self.rule.week_start);
                let target = week_start(from_date, self.rule.week_start);
                (target - start).num_days() / 7
            }
            Frequency::Monthly => {
                months_between(first_of_month(self.anchor_date), first_of_month(from_date))
            }
            Frequency::Yearly => i64::from(from_date.year() - self.anchor_date.year()),
        };
        let periods = u64::try_from(elapsed).unwrap_or(0) / interval;
        self.period = periods.saturating_sub(1);
        self.last_hit = from_date;
        self
    }

    fn refill(&mut self) -> bool {
        let Some((start, dates)) = self.period_dates(self.period) else {
            return false;
        };
        if self.limit.is_some_and(|limit| start > limit) {
            return false;
        }
        if self
            .rule
            .until
            .is_some_and(|until| start > until.date_naive())
        {
            return false;
        }
        let horizon = self
            .last_hit
            .checked_add_months(Months::new(SEARCH_HORIZON_MONTHS))
            .unwrap_or(NaiveDate::MAX);
        if start > horizon {
            return false;
        }

        self.period += 1;
        self.pending.extend(dates);
        true
    }

    /// The first day of period `index` and its candidate dates, ascending.
    fn period_dates(&self, index: u64) -> Option<(NaiveDate, Vec<NaiveDate>)> {
        let rule = self.rule;
        let step = u64::from(rule.interval.max(1)).checked_mul(index)?;

        match rule.frequency {
            Frequency::Daily => {
                let day = self.anchor_date.checked_add_days(Days::new(step))?;
                let dates = if month_allowed(rule, day)
                    && month_day_allowed(rule, day)
                    && weekday_allowed(rule, day)
                {
                    vec![day]
                } else {
                    Vec::new()
                };
                Some((day, dates))
            }
            Frequency::Weekly => {
                let week = week_start(self.anchor_date, rule.week_start)
                    .checked_add_days(Days::new(step.checked_mul(7)?))?;
                let mut dates = Vec::new();
                for offset in 0..7 {
                    let Some(day) = week.checked_add_days(Days::new(offset)) else {
                        break;
                    };
                    let wanted = if rule.by_day.is_empty() {
                        day.weekday() == self.anchor_date.weekday()
                    } else {
                        weekday_allowed(rule, day)
                    };
                    if wanted && month_allowed(rule, day) && month_day_allowed(rule, day) {
                        dates.push(day);
                    }
                }
                Some((week, dates))
            }
            Frequency::Monthly => {
                let months = u32::try_from(step).ok()?;
                let first =
                    first_of_month(self.anchor_date).checked_add_months(Months::new(months))?;
                let dates = if month_allowed(rule, first) {
                    self.month_dates(first)
                } else {
                    Vec::new()
                };
                Some((first, dates))
            }
            Frequency::Yearly => {
                let year = self.anchor_date.year().checked_add(i32::try_from(step).ok()?)?;
                let first = NaiveDate::from_ymd_opt(year, 1, 1)?;
                Some((first, self.year_dates(year)))
            }
        }
    }

    fn month_dates(&self, first: NaiveDate) -> Vec<NaiveDate> {
        let rule = self.rule;
        let last = last_of_month(first);

        let unrestricted = (rule.by_month_day.is_empty(), rule.by_day.is_empty());
        let mut dates: Vec<NaiveDate> = match unrestricted {
            (true, true) => first.with_day(self.anchor_date.day()).into_iter().collect(),
            (false, true) => month_days(rule, first, last),
            (true, false) => rule
                .by_day
                .iter()
                .flat_map(|spec| weekdays_between(first, last, *spec))
                .collect(),
            (false, false) => {
                let weekdays: Vec<NaiveDate> = rule
                    .by_day
                    .iter()
                    .flat_map(|spec| weekdays_between(first, last, *spec))
                    .collect();
                month_days(rule, first, last)
                    .into_iter()
                    .filter(|day| weekdays.contains(day))
                    .collect()
            }
        };
        dates.sort_unstable();
        dates.dedup();
        dates
    }

    fn year_dates(&self, year: i32) -> Vec<NaiveDate> {
        let rule = self.rule;

        let months: Vec<u32> = if !rule.by_month.is_empty() {
            rule.by_month.iter().map(|month| u32::from(*month)).collect()
        } else if !rule.by_month_day.is_empty() {
            (1..=12).collect()
        } else if !rule.by_day.is_empty() {
            // BYDAY alone on a yearly rule counts ordinals across the whole year.
            let (Some(first), Some(last)) = (
                NaiveDate::from_ymd_opt(year, 1, 1),
                NaiveDate::from_ymd_opt(year, 12, 31),
            ) else {
                return Vec::new();
            };
            let mut dates: Vec<NaiveDate> = rule
                .by_day
                .iter()
                .flat_map(|spec| weekdays_between(first, last, *spec))
                .collect();
            dates.sort_unstable();
            dates.dedup();
            return dates;
        } else {
            vec![self.anchor_date.month()]
        };

        let mut dates: Vec<NaiveDate> = months
            .into_iter()
            .filter_map(|month| NaiveDate::from_ymd_opt(year, month, 1))
            .flat_map(|first| self.month_dates(first))
            .collect();
        dates.sort_unstable();
        dates.dedup();
        dates
    }
}

impl Iterator for Occurrences<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if self.rule.count.is_some_and(|count| self.emitted >= count) {
                self.finished = true;
                return None;
            }

            let Some(date) = self.pending.pop_front() else {
                if !self.refill() {
                    self.finished = true;
                }
                continue;
            };

            let at = date.and_time(self.time).and_utc();
            if at < self.anchor {
                continue;
            }
            if self.rule.until.is_some_and(|until| at > until) {
                self.finished = true;
                return None;
            }

            self.emitted += 1;
            self.last_hit = date;
            return Some(at);
        }
    }
}

impl FusedIterator for Occurrences<'_> {}

impl RecurrenceRule {
    /// Every occurrence from `anchor` onwards, in ascending order.
    pub fn occurrences(&self, anchor: DateTime<Utc>) -> Occurrences<'_> {
        Occurrences::new(self, anchor)
    }

    /// Lazy occurrences inside `[from, to]`, both ends inclusive.
    pub fn window(
        &self,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.occurrences(anchor)
            .starting_near(from)
            .bounded_by(to)
            .skip_while(move |at| *at < from)
            .take_while(move |at| *at <= to)
    }

    /// Occurrences inside `[from, to]`, both ends inclusive.
    pub fn between(
        &self,
        anchor: DateTime<Utc>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        if from > to {
            return Vec::new();
        }
        self.window(anchor, from, to).collect()
    }

    /// The first occurrence strictly after `after`.
    pub fn after(&self, anchor: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.occurrences(anchor)
            .starting_near(after)
            .find(|at| *at > after)
    }
}

fn month_allowed(rule: &RecurrenceRule, day: NaiveDate) -> bool {
    rule.by_month.is_empty()
        || rule
            .by_month
            .iter()
            .any(|month| u32::from(*month) == day.month())
}

fn month_day_allowed(rule: &RecurrenceRule, day: NaiveDate) -> bool {
    if rule.by_month_day.is_empty() {
        return true;
    }
    let first = first_of_month(day);
    let last = last_of_month(day);
    rule.by_month_day
        .iter()
        .any(|wanted| resolve_month_day(first, last, *wanted) == Some(day))
}

fn weekday_allowed(rule: &RecurrenceRule, day: NaiveDate) -> bool {
    rule.by_day.is_empty() || rule.by_day.iter().any(|spec| spec.weekday == day.weekday())
}

fn month_days(rule: &RecurrenceRule, first: NaiveDate, last: NaiveDate) -> Vec<NaiveDate> {
    rule.by_month_day
        .iter()
        .filter_map(|day| resolve_month_day(first, last, *day))
        .collect()
}

/// Negative days count back from the end of the month; days the month does
/// not have resolve to nothing.
fn resolve_month_day(first: NaiveDate, last: NaiveDate, day: i8) -> Option<NaiveDate> {
    let resolved = if day > 0 {
        i64::from(day)
    } else {
        i64::from(last.day()) + 1 + i64::from(day)
    };
    if resolved < 1 {
        return None;
    }
    first.with_day(u32::try_from(resolved).ok()?)
}

fn weekdays_between(first: NaiveDate, last: NaiveDate, spec: WeekdaySpec) -> Vec<NaiveDate> {
    let matching: Vec<NaiveDate> = first
        .iter_days()
        .take_while(|day| *day <= last)
        .filter(|day| day.weekday() == spec.weekday)
        .collect();

    match spec.ordinal {
        None => matching,
        Some(ordinal) if ordinal > 0 => matching
            .get(usize::from(ordinal.unsigned_abs()) - 1)
            .copied()
            .into_iter()
            .collect(),
        Some(ordinal) => matching
            .len()
            .checked_sub(usize::from(ordinal.unsigned_abs()))
            .and_then(|index| matching.get(index))
            .copied()
            .into_iter()
            .collect(),
    }
}

fn week_start(day: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (7 + day.weekday().num_days_from_monday() - week_start.num_days_from_monday()) % 7;
    day - Days::new(u64::from(offset))
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn last_of_month(day: NaiveDate) -> NaiveDate {
    first_of_month(day)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day)
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    i64::from(to.year() - from.year()) * 12 + i64::from(to.month()) - i64::from(from.month())
}
