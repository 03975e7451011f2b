use billcycle_core::{EntryKind, Instance, NewTemplate, Priority};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const INSTANCES_GENERATED_CHANNEL: &str = "instances.generated";
pub const MAINTENANCE_COMPLETED_CHANNEL: &str = "maintenance.completed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleRequest {
    pub rrule: String,
    pub dtstart: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeRuleResponse {
    pub rrule: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRuleRequest {
    pub rrule: String,
    pub dtstart: DateTime<Utc>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exclude: Vec<NaiveDate>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRuleResponse {
    pub occurrences: Vec<DateTime<Utc>>,
    pub due_dates: Vec<NaiveDate>,
    pub next: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub kind: EntryKind,
    pub title: String,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_recurring: bool,
    pub rrule: Option<String>,
    pub dtstart: Option<DateTime<Utc>>,
    pub dtend: Option<DateTime<Utc>>,
    pub auto_generate_days_ahead: Option<u32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub notes: Option<String>,
}

impl CreateTemplateRequest {
    pub fn into_new_template(self, default_days_ahead: u32) -> NewTemplate {
        NewTemplate {
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
            auto_generate_days_ahead: self.auto_generate_days_ahead.unwrap_or(default_days_ahead),
            is_active: self.is_active,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkPaidRequest {
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkPayRequest {
    pub instance_ids: Vec<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkPayResponse {
    pub requested: usize,
    pub paid: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancesGeneratedEvent {
    pub template_id: Uuid,
    pub instance_ids: Vec<Uuid>,
    pub due_dates: Vec<NaiveDate>,
    pub generated_at: DateTime<Utc>,
}

impl InstancesGeneratedEvent {
    /// `None` when nothing was generated.
    pub fn from_instances(
        template_id: Uuid,
        instances: &[Instance],
        generated_at: DateTime<Utc>,
    ) -> Option<Self> {
        if instances.is_empty() {
            return None;
        }
        Some(Self {
            template_id,
            instance_ids: instances.iter().map(|instance| instance.id).collect(),
            due_dates: instances.iter().map(|instance| instance.due_date).collect(),
            generated_at,
        })
    }
}

fn default_currency() -> String {
    billcycle_core::DEFAULT_CURRENCY.to_string()
}

fn default_active() -> bool {
    true
}
