use chrono::{DateTime, Datelike, Utc, Weekday};

use crate::rule::{Frequency, RecurrenceRule, WeekdaySpec};

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WORKWEEK: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

/// Renders a rule as an English phrase such as "every 2 weeks on Monday and
/// Friday" or "every month on the last day for 6 times".
pub fn describe_rule(rule: &RecurrenceRule, anchor: Option<DateTime<Utc>>) -> String {
    let (unit, units) = match rule.frequency {
        Frequency::Daily => ("day", "days"),
        Frequency::Weekly => ("week", "weeks"),
        Frequency::Monthly => ("month", "months"),
        Frequency::Yearly => ("year", "years"),
    };

    let mut text = if is_workweek(&rule.by_day) && rule.frequency == Frequency::Weekly {
        if rule.interval > 1 {
            format!("every {} weeks on weekdays", rule.interval)
        } else {
            "every weekday".to_string()
        }
    } else if rule.interval > 1 {
        format!("every {} {units}", rule.interval)
    } else {
        format!("every {unit}")
    };

    if !rule.by_month.is_empty() {
        let months: Vec<String> = rule
            .by_month
            .iter()
            .filter_map(|month| MONTH_NAMES.get(usize::from(*month).wrapping_sub(1)))
            .map(|name| name.to_string())
            .collect();
        text.push_str(" in ");
        text.push_str(&join_words(&months));
    }

    let weekdays: Vec<String> = rule.by_day.iter().map(weekday_phrase).collect();
    let month_days: Vec<String> = rule
        .by_month_day
        .iter()
        .map(|day| month_day_phrase(*day))
        .collect();

    match (weekdays.is_empty(), month_days.is_empty()) {
        (false, false) => {
            text.push_str(&format!(
                " on {} the {}",
                join_words(&weekdays),
                join_words(&month_days)
            ));
        }
        (false, true) if !is_workweek(&rule.by_day) || rule.frequency != Frequency::Weekly => {
            text.push_str(&format!(" on {}", join_words(&weekdays)));
        }
        (true, false) => {
            text.push_str(&format!(" on the {}", join_words(&month_days)));
        }
        (true, true) => {
            if let Some(anchor) = anchor {
                text.push_str(&anchor_phrase(rule, anchor));
            }
        }
        _ => {}
    }

    if let Some(count) = rule.count {
        let times = if count == 1 { "time" } else { "times" };
        text.push_str(&format!(" for {count} {times}"));
    }
    if let Some(until) = rule.until {
        text.push_str(&format!(" until {}", until.format("%B %-d, %Y")));
    }

    text
}

fn anchor_phrase(rule: &RecurrenceRule, anchor: DateTime<Utc>) -> String {
    match rule.frequency {
        Frequency::Daily => String::new(),
        Frequency::Weekly => format!(" on {}", weekday_name(anchor.weekday())),
        Frequency::Monthly => format!(" on the {}", day_ordinal(anchor.day())),
        Frequency::Yearly if rule.by_month.is_empty() => {
            format!(" on {} {}", MONTH_NAMES[anchor.month0() as usize], anchor.day())
        }
        Frequency::Yearly => format!(" on the {}", day_ordinal(anchor.day())),
    }
}

fn is_workweek(by_day: &[WeekdaySpec]) -> bool {
    by_day.len() == WORKWEEK.len()
        && by_day.iter().all(|spec| spec.ordinal.is_none())
        && WORKWEEK
            .iter()
            .all(|weekday| by_day.iter().any(|spec| spec.weekday == *weekday))
}

fn weekday_phrase(spec: &WeekdaySpec) -> String {
    let name = weekday_name(spec.weekday);
    match spec.ordinal {
        None => name.to_string(),
        Some(-1) => format!("the last {name}"),
        Some(ordinal) if ordinal < 0 => {
            format!("the {} to last {name}", nth_word(ordinal.unsigned_abs()))
        }
        Some(ordinal) => format!("the {} {name}", nth_word(ordinal.unsigned_abs())),
    }
}

fn month_day_phrase(day: i8) -> String {
    match day {
        -1 => "last day".to_string(),
        day if day < 0 => format!("{} to last day", day_ordinal(u32::from(day.unsigned_abs()))),
        day => day_ordinal(u32::from(day.unsigned_abs())),
    }
}

fn nth_word(n: u8) -> String {
    match n {
        1 => "first".to_string(),
        2 => "second".to_string(),
        3 => "third".to_string(),
        4 => "fourth".to_string(),
        5 => "fifth".to_string(),
        n => day_ordinal(u32::from(n)),
    }
}

fn day_ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

pub(crate) fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

fn join_words(words: &[String]) -> String {
    match words {
        [] => String::new(),
        [only] => only.clone(),
        [head @ .., last] => format!("{} and {last}", head.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn describe(text: &str) -> String {
        describe_rule(&text.parse().unwrap(), None)
    }

    #[test]
    fn plain_frequencies() {
        assert_eq!(describe("FREQ=DAILY"), "every day");
        assert_eq!(describe("FREQ=WEEKLY"), "every week");
        assert_eq!(describe("FREQ=MONTHLY"), "every month");
        assert_eq!(describe("FREQ=YEARLY"), "every year");
        assert_eq!(describe("FREQ=DAILY;INTERVAL=3"), "every 3 days");
    }

    #[test]
    fn weekday_lists() {
        assert_eq!(
            describe("FREQ=WEEKLY;BYDAY=MO,WE,FR"),
            "every week on Monday, Wednesday and Friday"
        );
        assert_eq!(describe("FREQ=WEEKLY;BYDAY=MO,TU,WE,TH,FR"), "every weekday");
        assert_eq!(
            describe("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TU,WE,TH,FR"),
            "every 2 weeks on weekdays"
        );
        assert_eq!(describe("FREQ=MONTHLY;BYDAY=-1FR"), "every month on the last Friday");
        assert_eq!(describe("FREQ=MONTHLY;BYDAY=2MO"), "every month on the second Monday");
    }

    #[test]
    fn month_days_and_months() {
        assert_eq!(describe("FREQ=MONTHLY;BYMONTHDAY=1"), "every month on the 1st");
        assert_eq!(describe("FREQ=MONTHLY;BYMONTHDAY=-1"), "every month on the last day");
        assert_eq!(describe("FREQ=MONTHLY;BYMONTHDAY=1,15"), "every month on the 1st and 15th");
        assert_eq!(
            describe("FREQ=YEARLY;BYMONTH=1;BYMONTHDAY=1"),
            "every year in January on the 1st"
        );
        assert_eq!(
            describe("FREQ=MONTHLY;BYDAY=FR;BYMONTHDAY=13"),
            "every month on Friday the 13th"
        );
    }

    #[test]
    fn limits() {
        assert_eq!(describe("FREQ=DAILY;COUNT=3"), "every day for 3 times");
        assert_eq!(
            describe("FREQ=DAILY;UNTIL=20241231T235959Z"),
            "every day until December 31, 2024"
        );
    }

    #[test]
    fn anchor_fills_in_the_day() {
        let anchor = Utc.with_ymd_and_hms(2025, 3, 15, 0, 0, 0).unwrap();
        let monthly: RecurrenceRule = "FREQ=MONTHLY".parse().unwrap();
        assert_eq!(describe_rule(&monthly, Some(anchor)), "every month on the 15th");
        let yearly: RecurrenceRule = "FREQ=YEARLY".parse().unwrap();
        assert_eq!(describe_rule(&yearly, Some(anchor)), "every year on March 15");
        let weekly: RecurrenceRule = "FREQ=WEEKLY".parse().unwrap();
        assert_eq!(describe_rule(&weekly, Some(anchor)), "every week on Saturday");
    }

    #[test]
    fn ordinals() {
        assert_eq!(day_ordinal(1), "1st");
        assert_eq!(day_ordinal(2), "2nd");
        assert_eq!(day_ordinal(3), "3rd");
        assert_eq!(day_ordinal(11), "11th");
        assert_eq!(day_ordinal(12), "12th");
        assert_eq!(day_ordinal(22), "22nd");
        assert_eq!(day_ordinal(31), "31st");
        assert_eq!(month_day_phrase(-2), "2nd to last day");
    }
}
