use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::BillingError;
use crate::status::InstanceStatus;

pub const DEFAULT_DAYS_AHEAD: u32 = 90;
pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    Bill,
    Income,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bill => "bill",
            Self::Income => "income",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = BillingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bill" => Ok(Self::Bill),
            "income" => Ok(Self::Income),
            other => Err(BillingError::Validation(format!("unknown entry kind '{other}'"))),
        }
    }
}

/// Urgency from 1 (lowest) to 5 (highest).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: u8) -> Result<Self, BillingError> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(BillingError::Validation(format!(
                "priority must be between 1 and 5, got {value}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Priority {
    type Error = BillingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: EntryKind,
    pub title: String,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: String,
    pub category_id: Option<Uuid>,
    pub priority: Priority,
    pub is_recurring: bool,
    pub rrule: Option<String>,
    pub dtstart: Option<DateTime<Utc>>,
    pub dtend: Option<DateTime<Utc>>,
    pub auto_generate_days_ahead: u32,
    pub is_active: bool,
    pub skipped_dates: BTreeSet<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// The rule and anchor to expand, when the template is an active
    /// recurring one.
    pub fn schedule(&self) -> Option<(&str, DateTime<Utc>)> {
        if !self.is_active || !self.is_recurring {
            return None;
        }
        let rrule = self.rrule.as_deref().filter(|rule| !rule.trim().is_empty())?;
        Some((rrule, self.dtstart?))
    }

    pub fn amount_or_zero(&self) -> Decimal {
        self.amount.unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Option<Uuid>,
    pub kind: EntryKind,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub category_id: Option<Uuid>,
    pub priority: Priority,
    pub due_date: NaiveDate,
    pub status: InstanceStatus,
    pub is_recurring: bool,
    pub is_historical: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// A scheduled snapshot of `template` due on `due_date`.
    pub fn from_template(template: &Template, due_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: template.user_id,
            template_id: Some(template.id),
            kind: template.kind,
            title: template.title.clone(),
            description: template.description.clone(),
            amount: template.amount_or_zero(),
            currency: template.currency.clone(),
            category_id: template.category_id,
            priority: template.priority,
            due_date,
            status: InstanceStatus::Scheduled,
            is_recurring: true,
            is_historical: false,
            paid_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_edit(&self) -> bool {
        !self.is_historical
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_days_ahead() -> u32 {
    DEFAULT_DAYS_AHEAD
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub user_id: Uuid,
    #[serde(default)]
    pub kind: EntryKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_recurring: bool,
    #[serde(default)]
    pub rrule: Option<String>,
    #[serde(default)]
    pub dtstart: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dtend: Option<DateTime<Utc>>,
    #[serde(default = "default_days_ahead")]
    pub auto_generate_days_ahead: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewTemplate {
    pub fn into_template(self, now: DateTime<Utc>) -> Template {
        Template {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            kind: self.kind,
            title: self.title,
            description: self.description,
            amount: self.amount,
            currency: self.currency,
            category_id: self.category_id,
            priority: self.priority,
            is_recurring: self.is_recurring,
            rrule: self.rrule,
            dtstart: self.dtstart,
            dtend: self.dtend,
            auto_generate_days_ahead: self.auto_generate_days_ahead,
            is_active: self.is_active,
            skipped_dates: BTreeSet::new(),
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial edit of a template. Absent fields are left untouched, an explicit
/// `null` clears the nullable ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateUpdate {
    pub title: Option<String>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Option<Uuid>>,
    pub priority: Option<Priority>,
    pub is_recurring: Option<bool>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub rrule: Option<Option<String>>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub dtstart: Option<Option<DateTime<Utc>>>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub dtend: Option<Option<DateTime<Utc>>>,
    pub auto_generate_days_ahead: Option<u32>,
    pub is_active: Option<bool>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl TemplateUpdate {
    /// Applies the edit and reports whether anything that shapes the
    /// generated schedule changed.
    ///
    /// A new rule or anchor starts a new schedule, so skipped dates from
    /// today onwards are forgotten.
    pub fn apply(self, template: &mut Template, now: DateTime<Utc>) -> bool {
        let before = (
            template.amount,
            template.rrule.clone(),
            template.dtstart,
            template.dtend,
            template.auto_generate_days_ahead,
            template.is_recurring,
            template.is_active,
        );

        if let Some(title) = self.title {
            template.title = title;
        }
        if let Some(description) = self.description {
            template.description = description;
        }
        if let Some(amount) = self.amount {
            template.amount = Some(amount);
        }
        if let Some(currency) = self.currency {
            template.currency = currency;
        }
        if let Some(category_id) = self.category_id {
            template.category_id = category_id;
        }
        if let Some(priority) = self.priority {
            template.priority = priority;
        }
        if let Some(is_recurring) = self.is_recurring {
            template.is_recurring = is_recurring;
        }
        if let Some(rrule) = self.rrule {
            template.rrule = rrule;
        }
        if let Some(dtstart) = self.dtstart {
            template.dtstart = dtstart;
        }
        if let Some(dtend) = self.dtend {
            template.dtend = dtend;
        }
        if let Some(days) = self.auto_generate_days_ahead {
            template.auto_generate_days_ahead = days;
        }
        if let Some(is_active) = self.is_active {
            template.is_active = is_active;
        }
        if let Some(notes) = self.notes {
            template.notes = notes;
        }
        template.updated_at = now;

        if template.rrule != before.1 || template.dtstart != before.2 {
            let today = now.date_naive();
            template.skipped_dates.retain(|date| *date < today);
        }

        let after = (
            template.amount,
            template.rrule.clone(),
            template.dtstart,
            template.dtend,
            template.auto_generate_days_ahead,
            template.is_recurring,
            template.is_active,
        );
        before != after
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInstance {
    pub user_id: Uuid,
    #[serde(default)]
    pub kind: EntryKind,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewInstance {
    /// A standalone, one-time instance awaiting payment.
    pub fn into_instance(self, now: DateTime<Utc>) -> Instance {
        Instance {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            template_id: None,
            kind: self.kind,
            title: self.title,
            description: self.description,
            amount: self.amount,
            currency: self.currency,
            category_id: self.category_id,
            priority: self.priority,
            due_date: self.due_date,
            status: InstanceStatus::Pending,
            is_recurring: false,
            is_historical: false,
            paid_at: None,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceUpdate {
    pub title: Option<String>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Option<Uuid>>,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

impl InstanceUpdate {
    pub fn apply(self, instance: &mut Instance, now: DateTime<Utc>) {
        if let Some(title) = self.title {
            instance.title = title;
        }
        if let Some(description) = self.description {
            instance.description = description;
        }
        if let Some(amount) = self.amount {
            instance.amount = amount;
        }
        if let Some(currency) = self.currency {
            instance.currency = currency;
        }
        if let Some(category_id) = self.category_id {
            instance.category_id = category_id;
        }
        if let Some(priority) = self.priority {
            instance.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            instance.due_date = due_date;
        }
        if let Some(notes) = self.notes {
            instance.notes = notes;
        }
        instance.updated_at = now;
    }
}

/// Narrows an instance listing. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceFilter {
    pub user_id: Option<Uuid>,
    pub kind: Option<EntryKind>,
    pub status: Option<InstanceStatus>,
    pub category_id: Option<Uuid>,
    pub due_from: Option<NaiveDate>,
    pub due_to: Option<NaiveDate>,
    pub is_recurring: Option<bool>,
    /// Case-insensitive match on title or description.
    pub search: Option<String>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        self.user_id.is_none_or(|user_id| instance.user_id == user_id)
            && self.kind.is_none_or(|kind| instance.kind == kind)
            && self.status.is_none_or(|status| instance.status == status)
            && self
                .category_id
                .is_none_or(|category_id| instance.category_id == Some(category_id))
            && self.due_from.is_none_or(|from| instance.due_date >= from)
            && self.due_to.is_none_or(|to| instance.due_date <= to)
            && self
                .is_recurring
                .is_none_or(|recurring| instance.is_recurring == recurring)
            && self.search.as_deref().is_none_or(|needle| {
                let needle = needle.to_lowercase();
                instance.title.to_lowercase().contains(&needle)
                    || instance
                        .description
                        .as_deref()
                        .is_some_and(|text| text.to_lowercase().contains(&needle))
            })
    }
}

/// Tells an absent field (`None`) apart from an explicit `null`
/// (`Some(None)`). Pair with `#[serde(default)]`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn template() -> Template {
        NewTemplate {
            user_id: Uuid::new_v4(),
            kind: EntryKind::Bill,
            title: "Rent".to_string(),
            description: None,
            amount: Some(Decimal::new(125_000, 2)),
            currency: "USD".to_string(),
            category_id: None,
            priority: Priority::default(),
            is_recurring: true,
            rrule: Some("FREQ=MONTHLY;BYMONTHDAY=1".to_string()),
            dtstart: Some(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap()),
            dtend: None,
            auto_generate_days_ahead: DEFAULT_DAYS_AHEAD,
            is_active: true,
            notes: None,
        }
        .into_template(Utc::now())
    }

    #[test]
    fn priority_is_bounded() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(6).is_err());
        assert_eq!(Priority::new(5).unwrap().get(), 5);
        assert!(serde_json::from_str::<Priority>("9").is_err());
        assert_eq!(serde_json::from_str::<Priority>("2").unwrap().get(), 2);
    }

    #[test]
    fn schedule_requires_active_recurrence() {
        let mut template = template();
        assert_eq!(
            template.schedule().map(|(rule, _)| rule),
            Some("FREQ=MONTHLY;BYMONTHDAY=1")
        );

        template.is_active = false;
        assert!(template.schedule().is_none());

        template.is_active = true;
        template.dtstart = None;
        assert!(template.schedule().is_none());
    }

    #[test]
    fn snapshot_copies_template_fields() {
        let mut template = template();
        template.amount = None;
        let due = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let instance = Instance::from_template(&template, due, Utc::now());

        assert_eq!(instance.template_id, Some(template.id));
        assert_eq!(instance.amount, Decimal::ZERO);
        assert_eq!(instance.status, InstanceStatus::Scheduled);
        assert!(instance.is_recurring);
        assert!(instance.can_edit());
    }

    #[test]
    fn update_reports_schedule_changes_only() {
        let mut template = template();
        let cosmetic = TemplateUpdate {
            title: Some("Apartment rent".to_string()),
            notes: Some(Some("landlord changed".to_string())),
            ..TemplateUpdate::default()
        };
        assert!(!cosmetic.apply(&mut template, Utc::now()));
        assert_eq!(template.title, "Apartment rent");

        let reschedule = TemplateUpdate {
            rrule: Some(Some("FREQ=MONTHLY;BYMONTHDAY=15".to_string())),
            ..TemplateUpdate::default()
        };
        assert!(reschedule.apply(&mut template, Utc::now()));

        let same_amount = TemplateUpdate {
            amount: template.amount,
            ..TemplateUpdate::default()
        };
        assert!(!same_amount.apply(&mut template, Utc::now()));
    }

    #[test]
    fn new_template_defaults() {
        let json = serde_json::json!({
            "user_id": Uuid::nil(),
            "title": "Salary",
            "kind": "income",
        });
        let new: NewTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(new.kind, EntryKind::Income);
        assert_eq!(new.currency, "USD");
        assert_eq!(new.auto_generate_days_ahead, 90);
        assert!(new.is_active);
        assert!(!new.is_recurring);
        assert_eq!(new.priority.get(), 3);
    }

    #[test]
    fn explicit_null_clears_and_absence_keeps() {
        let mut template = template();
        template.dtend = Some(Utc.with_ymd_and_hms(2026, 6, 30, 0, 0, 0).unwrap());
        template.notes = Some("paper bill".to_string());

        let update: TemplateUpdate = serde_json::from_value(serde_json::json!({
            "dtend": null,
            "title": "Rent",
        }))
        .unwrap();
        assert_eq!(update.dtend, Some(None));
        assert_eq!(update.notes, None);

        assert!(update.apply(&mut template, Utc::now()));
        assert_eq!(template.dtend, None);
        assert_eq!(template.notes.as_deref(), Some("paper bill"));
    }

    #[test]
    fn new_rule_forgets_upcoming_skips() {
        let mut template = template();
        let past = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        let upcoming = NaiveDate::from_ymd_opt(2025, 12, 8).unwrap();
        template.skipped_dates.extend([past, upcoming]);
        let now = Utc.with_ymd_and_hms(2025, 12, 1, 12, 0, 0).unwrap();

        let retitle = TemplateUpdate {
            title: Some("Flat".to_string()),
            auto_generate_days_ahead: Some(30),
            ..TemplateUpdate::default()
        };
        retitle.apply(&mut template, now);
        assert_eq!(template.skipped_dates.len(), 2);

        let daily = TemplateUpdate {
            rrule: Some(Some("FREQ=DAILY".to_string())),
            ..TemplateUpdate::default()
        };
        assert!(daily.apply(&mut template, now));
        assert_eq!(template.skipped_dates, BTreeSet::from([past]));
    }

    #[test]
    fn filter_narrows_on_every_field() {
        let template = template();
        let due = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let mut instance = Instance::from_template(&template, due, Utc::now());
        instance.description = Some("Monthly Apartment payment".to_string());

        assert!(InstanceFilter::default().matches(&instance));

        let matching = InstanceFilter {
            user_id: Some(template.user_id),
            kind: Some(EntryKind::Bill),
            status: Some(InstanceStatus::Scheduled),
            due_from: Some(due),
            due_to: Some(due),
            is_recurring: Some(true),
            search: Some("apartment".to_string()),
            ..InstanceFilter::default()
        };
        assert!(matching.matches(&instance));

        let later = InstanceFilter {
            due_from: NaiveDate::from_ymd_opt(2025, 12, 2),
            ..InstanceFilter::default()
        };
        assert!(!later.matches(&instance));

        let income = InstanceFilter {
            kind: Some(EntryKind::Income),
            ..InstanceFilter::default()
        };
        assert!(!income.matches(&instance));

        let standalone = InstanceFilter {
            is_recurring: Some(false),
            ..InstanceFilter::default()
        };
        assert!(!standalone.matches(&instance));
    }
}
