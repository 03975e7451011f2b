use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use billcycle_core::{
    Instance, InstanceFilter, InstanceStatus, InstanceStore, StatusChange, Template, TemplateStore,
};
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local store. Holds the same `(template_id, due_date)` uniqueness
/// as the Postgres schema so the two are interchangeable.
#[derive(Default)]
pub struct InMemoryStore {
    templates: RwLock<HashMap<Uuid, Template>>,
    instances: RwLock<HashMap<Uuid, Instance>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for InMemoryStore {
    async fn insert_template(&self, template: Template) -> anyhow::Result<Template> {
        let mut templates = self.templates.write().await;
        if templates.contains_key(&template.id) {
            anyhow::bail!("template {} already exists", template.id);
        }
        templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>> {
        let templates = self.templates.read().await;
        Ok(templates.get(&id).cloned())
    }

    async fn update_template(&self, template: Template) -> anyhow::Result<Template> {
        let mut templates = self.templates.write().await;
        let Some(slot) = templates.get_mut(&template.id) else {
            anyhow::bail!("template {} does not exist", template.id);
        };
        *slot = template.clone();
        Ok(template)
    }

    async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut templates = self.templates.write().await;
        Ok(templates.remove(&id).is_some())
    }

    async fn list_recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
        let templates = self.templates.read().await;
        let mut recurring: Vec<Template> = templates
            .values()
            .filter(|template| template.is_active && template.is_recurring)
            .cloned()
            .collect();
        recurring.sort_by_key(|template| template.created_at);
        Ok(recurring)
    }
}

#[async_trait]
impl InstanceStore for InMemoryStore {
    async fn existing_due_dates(&self, template_id: Uuid) -> anyhow::Result<BTreeSet<NaiveDate>> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|instance| instance.template_id == Some(template_id))
            .map(|instance| instance.due_date)
            .collect())
    }

    async fn insert_instances(&self, new: Vec<Instance>) -> anyhow::Result<Vec<Instance>> {
        let mut instances = self.instances.write().await;
        let mut taken: BTreeSet<(Uuid, NaiveDate)> = instances
            .values()
            .filter_map(|instance| instance.template_id.map(|id| (id, instance.due_date)))
            .collect();

        let mut inserted = Vec::with_capacity(new.len());
        for instance in new {
            if instances.contains_key(&instance.id) {
                anyhow::bail!("instance {} already exists", instance.id);
            }
            if let Some(template_id) = instance.template_id {
                if !taken.insert((template_id, instance.due_date)) {
                    continue;
                }
            }
            instances.insert(instance.id, instance.clone());
            inserted.push(instance);
        }
        Ok(inserted)
    }

    async fn get_instance(&self, id: Uuid) -> anyhow::Result<Option<Instance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(&id).cloned())
    }

    async fn list_instances(&self, template_id: Uuid) -> anyhow::Result<Vec<Instance>> {
        let instances = self.instances.read().await;
        let mut listed: Vec<Instance> = instances
            .values()
            .filter(|instance| instance.template_id == Some(template_id))
            .cloned()
            .collect();
        listed.sort_by_key(|instance| instance.due_date);
        Ok(listed)
    }

    async fn find_instances(&self, filter: &InstanceFilter) -> anyhow::Result<Vec<Instance>> {
        let instances = self.instances.read().await;
        let mut found: Vec<Instance> = instances
            .values()
            .filter(|instance| filter.matches(instance))
            .cloned()
            .collect();
        found.sort_by_key(|instance| (instance.due_date, instance.created_at));
        Ok(found)
    }

    async fn update_instance(&self, instance: Instance) -> anyhow::Result<Instance> {
        let mut instances = self.instances.write().await;
        if let Some(template_id) = instance.template_id {
            let clash = instances.values().any(|other| {
                other.id != instance.id
                    && other.template_id == Some(template_id)
                    && other.due_date == instance.due_date
            });
            if clash {
                anyhow::bail!(
                    "template {template_id} already has an instance due {}",
                    instance.due_date
                );
            }
        }
        let Some(slot) = instances.get_mut(&instance.id) else {
            anyhow::bail!("instance {} does not exist", instance.id);
        };
        *slot = instance.clone();
        Ok(instance)
    }

    async fn update_instance_status(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> anyhow::Result<Option<Instance>> {
        let mut instances = self.instances.write().await;
        let Some(instance) = instances.get_mut(&id) else {
            return Ok(None);
        };
        instance.status = change.status;
        if change.paid_at.is_some() {
            instance.paid_at = change.paid_at;
        }
        if change.notes.is_some() {
            instance.notes = change.notes;
        }
        instance.updated_at = change.updated_at;
        Ok(Some(instance.clone()))
    }

    async fn delete_instance(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut instances = self.instances.write().await;
        Ok(instances.remove(&id).is_some())
    }

    async fn delete_future_instances(
        &self,
        template_id: Uuid,
        from: NaiveDate,
        statuses: &[InstanceStatus],
    ) -> anyhow::Result<u64> {
        let mut instances = self.instances.write().await;
        let before = instances.len();
        instances.retain(|_, instance| {
            !(instance.template_id == Some(template_id)
                && instance.due_date >= from
                && !instance.is_historical
                && statuses.contains(&instance.status))
        });
        Ok((before - instances.len()) as u64)
    }

    async fn detach_instances(&self, template_id: Uuid) -> anyhow::Result<u64> {
        let mut instances = self.instances.write().await;
        let now = Utc::now();
        let mut detached = 0;
        for instance in instances.values_mut() {
            if instance.template_id == Some(template_id) {
                instance.template_id = None;
                instance.updated_at = now;
                detached += 1;
            }
        }
        Ok(detached)
    }

    async fn mark_overdue_before(
        &self,
        today: NaiveDate,
        from_statuses: &[InstanceStatus],
    ) -> anyhow::Result<u64> {
        let mut instances = self.instances.write().await;
        let now = Utc::now();
        let mut marked = 0;
        for instance in instances.values_mut() {
            if instance.due_date < today && from_statuses.contains(&instance.status) {
                instance.status = InstanceStatus::Overdue;
                instance.updated_at = now;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn mark_historical_before(&self, today: NaiveDate) -> anyhow::Result<u64> {
        let mut instances = self.instances.write().await;
        let mut marked = 0;
        for instance in instances.values_mut() {
            if instance.due_date < today && !instance.is_historical {
                instance.is_historical = true;
                marked += 1;
            }
        }
        Ok(marked)
    }
}
