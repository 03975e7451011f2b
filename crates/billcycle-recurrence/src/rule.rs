use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
            Self::Yearly => "YEARLY",
        }
    }
}

impl FromStr for Frequency {
    type Err = RuleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Self::Daily),
            "WEEKLY" => Ok(Self::Weekly),
            "MONTHLY" => Ok(Self::Monthly),
            "YEARLY" => Ok(Self::Yearly),
            other => Err(RuleError::UnknownFrequency(other.to_string())),
        }
    }
}

/// A BYDAY entry: a weekday, optionally pinned to its nth (or nth-from-last)
/// appearance inside the month or year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekdaySpec {
    pub weekday: Weekday,
    pub ordinal: Option<i8>,
}

impl WeekdaySpec {
    pub fn every(weekday: Weekday) -> Self {
        Self {
            weekday,
            ordinal: None,
        }
    }

    pub fn nth(ordinal: i8, weekday: Weekday) -> Self {
        Self {
            weekday,
            ordinal: Some(ordinal),
        }
    }
}

impl fmt::Display for WeekdaySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ordinal) = self.ordinal {
            write!(f, "{ordinal}")?;
        }
        f.write_str(weekday_code(self.weekday))
    }
}

pub fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

pub fn parse_weekday_code(code: &str) -> Option<Weekday> {
    match code.trim().to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// A parsed RFC 5545 RRULE restricted to the DAILY..YEARLY frequencies.
///
/// Values only come out of [`str::parse`] once every field has been checked,
/// and serialize back to the canonical wire form through `Display`, which is
/// also what serde uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub by_day: Vec<WeekdaySpec>,
    pub by_month_day: Vec<i8>,
    pub by_month: Vec<u8>,
    pub week_start: Weekday,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            week_start: Weekday::Mon,
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = WeekdaySpec>) -> Self {
        self.by_day = weekdays.into_iter().collect();
        self
    }

    pub fn with_month_days(mut self, days: impl IntoIterator<Item = i8>) -> Self {
        self.by_month_day = days.into_iter().collect();
        self
    }

    pub fn with_months(mut self, months: impl IntoIterator<Item = u8>) -> Self {
        self.by_month = months.into_iter().collect();
        self
    }

    /// Checks the cross-field constraints a well-formed rule must satisfy.
    pub fn check(&self) -> Result<(), RuleError> {
        if self.interval == 0 {
            return Err(RuleError::invalid("INTERVAL", "0", "must be a positive integer"));
        }
        if self.count == Some(0) {
            return Err(RuleError::invalid("COUNT", "0", "must be a positive integer"));
        }
        for day in &self.by_month_day {
            if *day == 0 || !(-31..=31).contains(day) {
                return Err(RuleError::invalid(
                    "BYMONTHDAY",
                    &day.to_string(),
                    "must be between -31 and 31, excluding 0",
                ));
            }
        }
        for month in &self.by_month {
            if !(1..=12).contains(month) {
                return Err(RuleError::invalid(
                    "BYMONTH",
                    &month.to_string(),
                    "must be between 1 and 12",
                ));
            }
        }
        for spec in &self.by_day {
            let Some(ordinal) = spec.ordinal else {
                continue;
            };
            if ordinal == 0 || !(-53..=53).contains(&ordinal) {
                return Err(RuleError::invalid(
                    "BYDAY",
                    &spec.to_string(),
                    "ordinal must be between -53 and 53, excluding 0",
                ));
            }
            if matches!(self.frequency, Frequency::Daily | Frequency::Weekly) {
                return Err(RuleError::invalid(
                    "BYDAY",
                    &spec.to_string(),
                    "ordinal weekdays require MONTHLY or YEARLY",
                ));
            }
        }
        Ok(())
    }
}

impl FromStr for RecurrenceRule {
    type Err = RuleError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let body = match trimmed.get(..6) {
            Some(prefix) if prefix.eq_ignore_ascii_case("RRULE:") => &trimmed[6..],
            _ => trimmed,
        };
        if body.trim().is_empty() {
            return Err(RuleError::Empty);
        }

        let mut seen: Vec<String> = Vec::new();
        let mut frequency = None;
        let mut rule = RecurrenceRule::new(Frequency::Daily);

        for part in body.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RuleError::MalformedPart(part.to_string()))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();

            if seen.contains(&key) {
                return Err(RuleError::DuplicateProperty(key));
            }
            seen.push(key.clone());

            match key.as_str() {
                "FREQ" => frequency = Some(value.parse::<Frequency>()?),
                "INTERVAL" => rule.interval = parse_positive("INTERVAL", value)?,
                "COUNT" => rule.count = Some(parse_positive("COUNT", value)?),
                "UNTIL" => rule.until = Some(parse_until(value)?),
                "BYDAY" => rule.by_day = parse_list("BYDAY", value, parse_weekday_spec)?,
                "BYMONTHDAY" => {
                    rule.by_month_day = parse_list("BYMONTHDAY", value, parse_month_day)?
                }
                "BYMONTH" => rule.by_month = parse_list("BYMONTH", value, parse_month)?,
                "WKST" => {
                    rule.week_start = parse_weekday_code(value).ok_or_else(|| {
                        RuleError::invalid("WKST", value, "expected one of MO,TU,WE,TH,FR,SA,SU")
                    })?;
                }
                _ => return Err(RuleError::UnknownProperty(key)),
            }
        }

        rule.frequency = frequency.ok_or(RuleError::MissingFrequency)?;
        rule.check()?;
        Ok(rule)
    }
}

impl TryFrom<String> for RecurrenceRule {
    type Error = RuleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecurrenceRule> for String {
    fn from(rule: RecurrenceRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={}", self.frequency.as_str())?;
        if self.interval > 1 {
            write!(f, ";INTERVAL={}", self.interval)?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={count}")?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format("%Y%m%dT%H%M%SZ"))?;
        }
        if !self.by_day.is_empty() {
            write!(f, ";BYDAY={}", join(&self.by_day))?;
        }
        if !self.by_month_day.is_empty() {
            write!(f, ";BYMONTHDAY={}", join(&self.by_month_day))?;
        }
        if !self.by_month.is_empty() {
            write!(f, ";BYMONTH={}", join(&self.by_month))?;
        }
        if self.week_start != Weekday::Mon {
            write!(f, ";WKST={}", weekday_code(self.week_start))?;
        }
        Ok(())
    }
}

fn join<T: fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_positive(key: &'static str, value: &str) -> Result<u32, RuleError> {
    match value.parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(RuleError::invalid(key, value, "must be a positive integer")),
    }
}

fn parse_list<T>(
    key: &'static str,
    value: &str,
    item: fn(&str) -> Result<T, RuleError>,
) -> Result<Vec<T>, RuleError> {
    if value.is_empty() {
        return Err(RuleError::invalid(key, value, "must not be empty"));
    }
    value.split(',').map(|token| item(token.trim())).collect()
}

fn parse_weekday_spec(token: &str) -> Result<WeekdaySpec, RuleError> {
    let invalid = || RuleError::invalid("BYDAY", token, "expected [+-n]MO,TU,WE,TH,FR,SA,SU");
    if token.len() < 2 || !token.is_ascii() {
        return Err(invalid());
    }
    let (prefix, code) = token.split_at(token.len() - 2);
    let weekday = parse_weekday_code(code).ok_or_else(invalid)?;
    if prefix.is_empty() {
        return Ok(WeekdaySpec::every(weekday));
    }
    let ordinal = prefix
        .strip_prefix('+')
        .unwrap_or(prefix)
        .parse::<i8>()
        .map_err(|_| invalid())?;
    Ok(WeekdaySpec::nth(ordinal, weekday))
}

fn parse_month_day(token: &str) -> Result<i8, RuleError> {
    match token.parse::<i8>() {
        Ok(day) if day != 0 && (-31..=31).contains(&day) => Ok(day),
        _ => Err(RuleError::invalid(
            "BYMONTHDAY",
            token,
            "must be between -31 and 31, excluding 0",
        )),
    }
}

fn parse_month(token: &str) -> Result<u8, RuleError> {
    match token.parse::<u8>() {
        Ok(month) if (1..=12).contains(&month) => Ok(month),
        _ => Err(RuleError::invalid("BYMONTH", token, "must be between 1 and 12")),
    }
}

/// UNTIL accepts `YYYYMMDDTHHMMSSZ`, the floating `YYYYMMDDTHHMMSS` (read as
/// UTC) and a bare `YYYYMMDD`, which covers the whole day.
fn parse_until(value: &str) -> Result<DateTime<Utc>, RuleError> {
    let invalid = || RuleError::invalid("UNTIL", value, "expected YYYYMMDD or YYYYMMDDTHHMMSSZ");
    let upper = value.to_ascii_uppercase();
    if upper.contains('T') {
        let stamp = upper.strip_suffix('Z').unwrap_or(&upper);
        return NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S")
            .map(|naive| naive.and_utc())
            .map_err(|_| invalid());
    }
    NaiveDate::parse_from_str(&upper, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(invalid)
}
