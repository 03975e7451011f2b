use std::sync::Arc;

use billcycle_core::{
    BillingError, BillingResult, Clock, Instance, InstanceFilter, InstanceStatus, InstanceUpdate,
    NewInstance, NewTemplate, StatusChange, Store, SystemClock, Template, TemplateUpdate,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::materializer::{InstanceMaterializer, RegenerationSummary};

/// Longest generation horizon a template may ask for.
pub const MAX_DAYS_AHEAD: u32 = 3_650;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedTemplate {
    pub template: Template,
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedTemplate {
    pub template: Template,
    pub regeneration: Option<RegenerationSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateDeletion {
    pub removed: u64,
    pub detached: u64,
}

/// Template and instance lifecycle. Every edit that changes a template's
/// schedule goes through here so generated instances follow it.
pub struct BillingService<S: ?Sized, C = SystemClock> {
    materializer: InstanceMaterializer<S, C>,
}

fn validate_template(template: &Template) -> BillingResult<()> {
    if template.title.trim().is_empty() {
        return Err(BillingError::Validation("title is required".to_string()));
    }
    if template.amount.is_some_and(|amount| amount < Decimal::ZERO) {
        return Err(BillingError::Validation("amount cannot be negative".to_string()));
    }
    if template.auto_generate_days_ahead > MAX_DAYS_AHEAD {
        return Err(BillingError::Validation(format!(
            "auto_generate_days_ahead cannot exceed {MAX_DAYS_AHEAD}"
        )));
    }
    if let (Some(start), Some(end)) = (template.dtstart, template.dtend) {
        if end < start {
            return Err(BillingError::Validation("dtend is before dtstart".to_string()));
        }
    }
    if let Some(rrule) = template.rrule.as_deref() {
        let validation = billcycle_recurrence::validate(rrule);
        if !validation.valid {
            return Err(BillingError::InvalidSpecification(
                validation.error.unwrap_or_default(),
            ));
        }
    }
    Ok(())
}

fn validate_instance(instance: &Instance) -> BillingResult<()> {
    if instance.title.trim().is_empty() {
        return Err(BillingError::Validation("title is required".to_string()));
    }
    if instance.amount < Decimal::ZERO {
        return Err(BillingError::Validation("amount cannot be negative".to_string()));
    }
    Ok(())
}

impl<S, C> BillingService<S, C>
where
    S: Store + ?Sized,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self {
            materializer: InstanceMaterializer::new(store, clock),
        }
    }

    pub fn materializer(&self) -> &InstanceMaterializer<S, C> {
        &self.materializer
    }

    fn store(&self) -> &S {
        self.materializer.store()
    }

    fn now(&self) -> DateTime<Utc> {
        self.materializer.clock().now()
    }

    pub async fn create_template(&self, new: NewTemplate) -> BillingResult<CreatedTemplate> {
        let template = new.into_template(self.now());
        validate_template(&template)?;

        let template = self.store().insert_template(template).await?;
        info!(template_id = %template.id, kind = %template.kind, "created template");

        let instances = if template.schedule().is_some() {
            self.materializer.generate_for(&template).await?
        } else {
            Vec::new()
        };

        Ok(CreatedTemplate {
            template,
            instances,
        })
    }

    pub async fn get_template(&self, id: Uuid) -> BillingResult<Template> {
        self.store()
            .get_template(id)
            .await?
            .ok_or(BillingError::TemplateNotFound(id))
    }

    pub async fn update_template(
        &self,
        id: Uuid,
        update: TemplateUpdate,
    ) -> BillingResult<UpdatedTemplate> {
        let mut template = self.get_template(id).await?;
        let reschedule = update.apply(&mut template, self.now());
        validate_template(&template)?;

        let template = self.store().update_template(template).await?;
        let regeneration = if reschedule {
            Some(self.materializer.regenerate_future_instances(id).await?)
        } else {
            None
        };

        info!(template_id = %id, rescheduled = reschedule, "updated template");
        Ok(UpdatedTemplate {
            template,
            regeneration,
        })
    }

    /// Drops the template's open future instances and keeps the rest as
    /// unlinked records.
    pub async fn delete_template(&self, id: Uuid) -> BillingResult<TemplateDeletion> {
        self.get_template(id).await?;
        let today = self.materializer.clock().today();

        let removed = self
            .store()
            .delete_future_instances(id, today, &InstanceStatus::UNRESOLVED)
            .await?;
        let detached = self.store().detach_instances(id).await?;
        self.store().delete_template(id).await?;

        info!(template_id = %id, removed, detached, "deleted template");
        Ok(TemplateDeletion { removed, detached })
    }

    pub async fn list_template_instances(&self, id: Uuid) -> BillingResult<Vec<Instance>> {
        self.get_template(id).await?;
        Ok(self.store().list_instances(id).await?)
    }

    pub async fn list_instances(&self, filter: &InstanceFilter) -> BillingResult<Vec<Instance>> {
        if let (Some(from), Some(to)) = (filter.due_from, filter.due_to) {
            if from > to {
                return Err(BillingError::Validation(
                    "due_from must not be after due_to".to_string(),
                ));
            }
        }
        Ok(self.store().find_instances(filter).await?)
    }

    pub async fn get_instance(&self, id: Uuid) -> BillingResult<Instance> {
        self.store()
            .get_instance(id)
            .await?
            .ok_or(BillingError::InstanceNotFound(id))
    }

    pub async fn create_instance(&self, new: NewInstance) -> BillingResult<Instance> {
        let instance = new.into_instance(self.now());
        validate_instance(&instance)?;

        let mut inserted = self.store().insert_instances(vec![instance]).await?;
        let instance = inserted
            .pop()
            .ok_or_else(|| BillingError::Validation("instance was not stored".to_string()))?;
        info!(instance_id = %instance.id, due_date = %instance.due_date, "created instance");
        Ok(instance)
    }

    /// Edits an instance. Moving a generated instance to another date
    /// retires its original date on the template, the same as a deletion.
    pub async fn update_instance(
        &self,
        id: Uuid,
        update: InstanceUpdate,
    ) -> BillingResult<Instance> {
        let mut instance = self.editable_instance(id).await?;

        let vacated = match (instance.template_id, update.due_date) {
            (Some(template_id), Some(due_date)) if due_date != instance.due_date => {
                if self
                    .store()
                    .existing_due_dates(template_id)
                    .await?
                    .contains(&due_date)
                {
                    return Err(BillingError::DuplicateDueDate);
                }
                Some((template_id, instance.due_date))
            }
            _ => None,
        };

        update.apply(&mut instance, self.now());
        validate_instance(&instance)?;
        let updated = self.store().update_instance(instance).await?;

        if let Some((template_id, due_date)) = vacated {
            self.skip_due_date(template_id, due_date).await?;
        }
        Ok(updated)
    }

    /// Deletes an instance. A generated one leaves its due date behind on
    /// the template so later horizon runs do not bring it back.
    pub async fn delete_instance(&self, id: Uuid) -> BillingResult<()> {
        let instance = self.editable_instance(id).await?;
        self.store().delete_instance(id).await?;

        if let Some(template_id) = instance.template_id {
            self.skip_due_date(template_id, instance.due_date).await?;
        }

        info!(instance_id = %id, due_date = %instance.due_date, "deleted instance");
        Ok(())
    }

    /// Settles an instance. Historical instances can still be settled while
    /// they are overdue.
    pub async fn mark_paid(
        &self,
        id: Uuid,
        paid_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> BillingResult<Instance> {
        let instance = self.get_instance(id).await?;
        if instance.is_historical && instance.status != InstanceStatus::Overdue {
            return Err(BillingError::HistoricalRecordImmutable(id));
        }
        let status = instance.status.transition(InstanceStatus::Paid)?;

        let now = self.now();
        let change = StatusChange {
            status,
            paid_at: Some(paid_at.unwrap_or(now)),
            notes,
            updated_at: now,
        };
        let paid = self
            .store()
            .update_instance_status(id, change)
            .await?
            .ok_or(BillingError::InstanceNotFound(id))?;

        info!(instance_id = %id, "marked instance paid");
        Ok(paid)
    }

    pub async fn cancel_instance(&self, id: Uuid) -> BillingResult<Instance> {
        let instance = self.editable_instance(id).await?;
        let status = instance.status.transition(InstanceStatus::Cancelled)?;

        let change = StatusChange {
            status,
            paid_at: None,
            notes: None,
            updated_at: self.now(),
        };
        let cancelled = self
            .store()
            .update_instance_status(id, change)
            .await?
            .ok_or(BillingError::InstanceNotFound(id))?;

        info!(instance_id = %id, "cancelled instance");
        Ok(cancelled)
    }

    /// Pays every listed instance that can be paid and returns how many
    /// were. Store failures abort the run.
    pub async fn bulk_mark_paid(
        &self,
        ids: &[Uuid],
        paid_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> BillingResult<usize> {
        let mut paid = 0;
        for id in ids {
            match self.mark_paid(*id, paid_at, notes.clone()).await {
                Ok(_) => paid += 1,
                Err(BillingError::Store(err)) => return Err(BillingError::Store(err)),
                Err(err) => debug!(instance_id = %id, error = %err, "skipped in bulk payment"),
            }
        }
        Ok(paid)
    }

    async fn skip_due_date(&self, template_id: Uuid, due_date: NaiveDate) -> BillingResult<()> {
        if let Some(mut template) = self.store().get_template(template_id).await? {
            if template.skipped_dates.insert(due_date) {
                template.updated_at = self.now();
                self.store().update_template(template).await?;
            }
        }
        Ok(())
    }

    async fn editable_instance(&self, id: Uuid) -> BillingResult<Instance> {
        let instance = self.get_instance(id).await?;
        if !instance.can_edit() {
            return Err(BillingError::HistoricalRecordImmutable(id));
        }
        Ok(instance)
    }
}
