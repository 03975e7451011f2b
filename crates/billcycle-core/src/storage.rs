use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{Instance, InstanceFilter, Template};
use crate::status::InstanceStatus;

/// A status write together with the settlement details that travel with it.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: InstanceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: Template) -> anyhow::Result<Template>;
    async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>>;
    async fn update_template(&self, template: Template) -> anyhow::Result<Template>;
    async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Active templates with recurrence switched on.
    async fn list_recurring_templates(&self) -> anyhow::Result<Vec<Template>>;
}

#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn existing_due_dates(&self, template_id: Uuid) -> anyhow::Result<BTreeSet<NaiveDate>>;
    /// Inserts every instance whose `(template_id, due_date)` is free and
    /// returns the ones actually written.
    async fn insert_instances(&self, instances: Vec<Instance>) -> anyhow::Result<Vec<Instance>>;
    async fn get_instance(&self, id: Uuid) -> anyhow::Result<Option<Instance>>;
    async fn list_instances(&self, template_id: Uuid) -> anyhow::Result<Vec<Instance>>;
    /// Instances matching `filter`, ordered by due date.
    async fn find_instances(&self, filter: &InstanceFilter) -> anyhow::Result<Vec<Instance>>;
    async fn update_instance(&self, instance: Instance) -> anyhow::Result<Instance>;
    async fn update_instance_status(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> anyhow::Result<Option<Instance>>;
    async fn delete_instance(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Removes non-historical instances of the template due on or after
    /// `from` whose status is one of `statuses`.
    async fn delete_future_instances(
        &self,
        template_id: Uuid,
        from: NaiveDate,
        statuses: &[InstanceStatus],
    ) -> anyhow::Result<u64>;
    /// Clears the template link on every remaining instance of the template.
    async fn detach_instances(&self, template_id: Uuid) -> anyhow::Result<u64>;
    async fn mark_overdue_before(
        &self,
        today: NaiveDate,
        from_statuses: &[InstanceStatus],
    ) -> anyhow::Result<u64>;
    async fn mark_historical_before(&self, today: NaiveDate) -> anyhow::Result<u64>;
}

pub trait Store: TemplateStore + InstanceStore {}

impl<T: TemplateStore + InstanceStore> Store for T {}
