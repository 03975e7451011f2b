use std::collections::BTreeSet;
use std::sync::Arc;

use billcycle_core::{
    BillingError, BillingResult, Clock, Instance, InstanceStatus, Store, SystemClock, Template,
};
use billcycle_recurrence::RecurrenceSet;
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegenerationSummary {
    pub removed: u64,
    pub created: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateFailure {
    pub template_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    pub templates: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failures: Vec<TemplateFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub run_at: DateTime<Utc>,
    pub overdue: u64,
    pub historical: u64,
    pub horizons: BatchReport,
}

/// Expands recurring templates into stored instances for a bounded horizon
/// and keeps the time-driven instance flags up to date.
pub struct InstanceMaterializer<S: ?Sized, C = SystemClock> {
    store: Arc<S>,
    clock: C,
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + TimeDelta::days(1) - TimeDelta::nanoseconds(1)
}

impl<S, C> InstanceMaterializer<S, C>
where
    S: Store + ?Sized,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// The inclusive window `[max(anchor, start of today), end of today +
    /// days ahead]`, cut short by the template's end. `None` when the window
    /// is empty.
    pub fn generation_window(
        &self,
        template: &Template,
        anchor: DateTime<Utc>,
    ) -> BillingResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let today = self.clock.today();
        let horizon = today
            .checked_add_days(Days::new(u64::from(template.auto_generate_days_ahead)))
            .ok_or_else(|| {
                BillingError::Validation(format!(
                    "generation horizon of {} days is out of range",
                    template.auto_generate_days_ahead
                ))
            })?;

        let from = anchor.max(start_of_day(today));
        let mut to = end_of_day(horizon);
        if let Some(dtend) = template.dtend {
            to = to.min(dtend);
        }

        Ok((from <= to).then_some((from, to)))
    }

    pub async fn generate_from_template(&self, template_id: Uuid) -> BillingResult<Vec<Instance>> {
        let template = self.load_template(template_id).await?;
        self.generate_for(&template).await
    }

    /// Materializes every missing occurrence of `template` inside its
    /// window. Repeating the call without edits in between writes nothing.
    pub async fn generate_for(&self, template: &Template) -> BillingResult<Vec<Instance>> {
        let Some((rrule, anchor)) = template.schedule() else {
            return Err(BillingError::TemplateNotRecurring(template.id));
        };

        let Some((from, to)) = self.generation_window(template, anchor)? else {
            debug!(template_id = %template.id, "generation window is empty");
            return Ok(Vec::new());
        };

        let rule = match billcycle_recurrence::parse(rrule) {
            Ok(rule) => rule,
            Err(err) => {
                warn!(
                    template_id = %template.id,
                    rrule,
                    error = %err,
                    "template has an invalid recurrence rule, nothing generated"
                );
                return Ok(Vec::new());
            }
        };

        let schedule = RecurrenceSet::new()
            .with_rule(rule)
            .excluding(template.skipped_dates.iter().copied());
        let due_dates: BTreeSet<NaiveDate> = schedule
            .between(anchor, from, to)
            .into_iter()
            .map(|at| at.date_naive())
            .collect();
        debug!(
            template_id = %template.id,
            %from,
            %to,
            occurrences = due_dates.len(),
            "expanded template schedule"
        );

        let existing = self.store.existing_due_dates(template.id).await?;
        let now = self.clock.now();
        let fresh: Vec<Instance> = due_dates
            .difference(&existing)
            .map(|due_date| Instance::from_template(template, *due_date, now))
            .collect();

        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let inserted = self.store.insert_instances(fresh).await?;
        info!(
            template_id = %template.id,
            created = inserted.len(),
            "materialized template instances"
        );
        Ok(inserted)
    }

    /// Replaces the open, non-historical instances due from today onwards
    /// with a fresh expansion of the template's current schedule. Settled
    /// and past instances are left alone.
    pub async fn regenerate_future_instances(
        &self,
        template_id: Uuid,
    ) -> BillingResult<RegenerationSummary> {
        let template = self.load_template(template_id).await?;
        let today = self.clock.today();

        let removed = self
            .store
            .delete_future_instances(template_id, today, &InstanceStatus::UNRESOLVED)
            .await?;

        let created = if template.schedule().is_some() {
            self.generate_for(&template).await?.len()
        } else {
            0
        };

        info!(%template_id, removed, created, "regenerated future instances");
        Ok(RegenerationSummary { removed, created })
    }

    /// Moves scheduled and pending instances due before today to overdue.
    pub async fn mark_overdue(&self) -> BillingResult<u64> {
        let today = self.clock.today();
        let marked = self
            .store
            .mark_overdue_before(today, &InstanceStatus::UNRESOLVED)
            .await?;
        if marked > 0 {
            info!(%today, marked, "marked instances overdue");
        }
        Ok(marked)
    }

    pub async fn mark_historical(&self) -> BillingResult<u64> {
        let today = self.clock.today();
        let marked = self.store.mark_historical_before(today).await?;
        if marked > 0 {
            info!(%today, marked, "marked instances historical");
        }
        Ok(marked)
    }

    /// Tops up every active recurring template to its horizon. A failing
    /// template is recorded and the batch moves on.
    pub async fn extend_horizons(&self) -> BillingResult<BatchReport> {
        let templates = self.store.list_recurring_templates().await?;
        let mut report = BatchReport {
            templates: templates.len(),
            ..BatchReport::default()
        };

        for template in &templates {
            if template.schedule().is_none() {
                report.skipped += 1;
                continue;
            }
            match self.generate_for(template).await {
                Ok(created) => report.generated += created.len(),
                Err(err) => {
                    warn!(template_id = %template.id, error = %err, "horizon extension failed");
                    report.failures.push(TemplateFailure {
                        template_id: template.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            templates = report.templates,
            generated = report.generated,
            failed = report.failures.len(),
            "extended template horizons"
        );
        Ok(report)
    }

    /// Overdue sweep, then historical sweep, then horizon extension. The
    /// overdue sweep runs first so lapsed instances stay payable once they
    /// turn historical.
    pub async fn run_daily_maintenance(&self) -> BillingResult<MaintenanceReport> {
        let run_at = self.clock.now();
        let overdue = self.mark_overdue().await?;
        let historical = self.mark_historical().await?;
        let horizons = self.extend_horizons().await?;

        Ok(MaintenanceReport {
            run_at,
            overdue,
            historical,
            horizons,
        })
    }

    async fn load_template(&self, template_id: Uuid) -> BillingResult<Template> {
        self.store
            .get_template(template_id)
            .await?
            .ok_or(BillingError::TemplateNotFound(template_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use billcycle_core::{
        EntryKind, FixedClock, InstanceFilter, InstanceStore, NewTemplate, Priority, StatusChange,
        TemplateStore,
    };
    use billcycle_store::InMemoryStore;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn new_template(rrule: &str, dtstart: NaiveDate, days_ahead: u32) -> Template {
        NewTemplate {
            user_id: Uuid::new_v4(),
            kind: EntryKind::Bill,
            title: "Electricity".to_string(),
            description: None,
            amount: Some(Decimal::new(8_000, 2)),
            currency: "USD".to_string(),
            category_id: None,
            priority: Priority::default(),
            is_recurring: true,
            rrule: Some(rrule.to_string()),
            dtstart: Some(start_of_day(dtstart)),
            dtend: None,
            auto_generate_days_ahead: days_ahead,
            is_active: true,
            notes: None,
        }
        .into_template(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    fn materializer<S: Store + ?Sized>(
        store: &Arc<S>,
        today: NaiveDate,
    ) -> InstanceMaterializer<S, FixedClock> {
        InstanceMaterializer::new(Arc::clone(store), FixedClock::on(today))
    }

    async fn due_dates(store: &InMemoryStore, template_id: Uuid) -> Vec<NaiveDate> {
        store
            .list_instances(template_id)
            .await
            .unwrap()
            .into_iter()
            .map(|instance| instance.due_date)
            .collect()
    }

    #[tokio::test]
    async fn fills_exactly_the_horizon() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=DAILY", date(2025, 11, 1), 90))
            .await
            .unwrap();

        let today = date(2025, 12, 1);
        let created = materializer(&store, today)
            .generate_from_template(template.id)
            .await
            .unwrap();

        assert_eq!(created.len(), 91);
        let dates = due_dates(&store, template.id).await;
        assert_eq!(dates.first(), Some(&today));
        assert_eq!(dates.last(), Some(&date(2026, 3, 1)));
        assert!(created.iter().all(|instance| {
            instance.status == InstanceStatus::Scheduled
                && instance.is_recurring
                && !instance.is_historical
                && instance.amount == Decimal::new(8_000, 2)
        }));
    }

    #[tokio::test]
    async fn second_run_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=WEEKLY;BYDAY=MO", date(2025, 12, 1), 60))
            .await
            .unwrap();
        let materializer = materializer(&store, date(2025, 12, 1));

        let first = materializer.generate_from_template(template.id).await.unwrap();
        assert!(!first.is_empty());
        let second = materializer.generate_from_template(template.id).await.unwrap();
        assert!(second.is_empty());

        let dates = due_dates(&store, template.id).await;
        assert_eq!(dates.len(), first.len());
        let unique: BTreeSet<NaiveDate> = dates.iter().copied().collect();
        assert_eq!(unique.len(), dates.len());
    }

    #[tokio::test]
    async fn concurrent_runs_never_duplicate_a_date() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=DAILY", date(2025, 12, 1), 30))
            .await
            .unwrap();
        let left = materializer(&store, date(2025, 12, 1));
        let right = materializer(&store, date(2025, 12, 1));

        let (a, b) = tokio::join!(
            left.generate_from_template(template.id),
            right.generate_from_template(template.id)
        );
        assert_eq!(a.unwrap().len() + b.unwrap().len(), 31);
        assert_eq!(due_dates(&store, template.id).await.len(), 31);
    }

    #[tokio::test]
    async fn future_anchor_and_end_bound_the_window() {
        let store = Arc::new(InMemoryStore::new());
        let mut template = new_template("FREQ=DAILY", date(2025, 12, 5), 90);
        template.dtend = Some(start_of_day(date(2025, 12, 9)));
        let template = store.insert_template(template).await.unwrap();

        materializer(&store, date(2025, 12, 1))
            .generate_from_template(template.id)
            .await
            .unwrap();

        assert_eq!(
            due_dates(&store, template.id).await,
            vec![
                date(2025, 12, 5),
                date(2025, 12, 6),
                date(2025, 12, 7),
                date(2025, 12, 8),
                date(2025, 12, 9)
            ]
        );
    }

    #[tokio::test]
    async fn skipped_dates_stay_skipped() {
        let store = Arc::new(InMemoryStore::new());
        let mut template = new_template("FREQ=DAILY", date(2025, 12, 1), 2);
        template.skipped_dates.insert(date(2025, 12, 2));
        let template = store.insert_template(template).await.unwrap();

        materializer(&store, date(2025, 12, 1))
            .generate_from_template(template.id)
            .await
            .unwrap();

        assert_eq!(
            due_dates(&store, template.id).await,
            vec![date(2025, 12, 1), date(2025, 12, 3)]
        );
    }

    #[tokio::test]
    async fn refuses_templates_without_active_recurrence() {
        let store = Arc::new(InMemoryStore::new());
        let mut inactive = new_template("FREQ=DAILY", date(2025, 12, 1), 10);
        inactive.is_active = false;
        let inactive = store.insert_template(inactive).await.unwrap();
        let materializer = materializer(&store, date(2025, 12, 1));

        assert!(matches!(
            materializer.generate_from_template(inactive.id).await,
            Err(BillingError::TemplateNotRecurring(id)) if id == inactive.id
        ));
        assert!(matches!(
            materializer.generate_from_template(Uuid::new_v4()).await,
            Err(BillingError::TemplateNotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_stored_rule_generates_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=BOGUS", date(2025, 12, 1), 10))
            .await
            .unwrap();

        let created = materializer(&store, date(2025, 12, 1))
            .generate_from_template(template.id)
            .await
            .unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn regeneration_keeps_history_and_settled_instances() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=MONTHLY;BYMONTHDAY=1", date(2025, 9, 1), 90))
            .await
            .unwrap();

        materializer(&store, date(2025, 9, 1))
            .generate_from_template(template.id)
            .await
            .unwrap();
        assert_eq!(
            due_dates(&store, template.id).await,
            vec![date(2025, 9, 1), date(2025, 10, 1), date(2025, 11, 1)]
        );

        let later = materializer(&store, date(2025, 10, 15));
        assert_eq!(later.mark_overdue().await.unwrap(), 2);
        assert_eq!(later.mark_historical().await.unwrap(), 2);
        let past_before: Vec<Instance> = store
            .list_instances(template.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|instance| instance.due_date < date(2025, 10, 15))
            .collect();

        let november = store.list_instances(template.id).await.unwrap()[2].clone();
        store
            .update_instance_status(
                november.id,
                StatusChange {
                    status: InstanceStatus::Paid,
                    paid_at: Some(later.clock().now()),
                    notes: None,
                    updated_at: later.clock().now(),
                },
            )
            .await
            .unwrap();

        let mut edited = template.clone();
        edited.rrule = Some("FREQ=MONTHLY;BYMONTHDAY=15".to_string());
        store.update_template(edited).await.unwrap();

        let summary = later.regenerate_future_instances(template.id).await.unwrap();
        assert_eq!(summary, RegenerationSummary { removed: 0, created: 3 });

        let all = store.list_instances(template.id).await.unwrap();
        let past_after: Vec<Instance> = all
            .iter()
            .filter(|instance| instance.due_date < date(2025, 10, 15))
            .cloned()
            .collect();
        assert_eq!(past_before, past_after);
        assert!(past_after.iter().all(|instance| instance.status == InstanceStatus::Overdue));
        assert_eq!(
            all.iter().map(|instance| instance.due_date).collect::<Vec<_>>(),
            vec![
                date(2025, 9, 1),
                date(2025, 10, 1),
                date(2025, 10, 15),
                date(2025, 11, 1),
                date(2025, 11, 15),
                date(2025, 12, 15)
            ]
        );
    }

    #[tokio::test]
    async fn regeneration_replaces_open_future_instances() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=WEEKLY", date(2025, 12, 1), 20))
            .await
            .unwrap();
        let materializer = materializer(&store, date(2025, 12, 1));
        materializer.generate_from_template(template.id).await.unwrap();

        let mut disabled = template.clone();
        disabled.is_active = false;
        store.update_template(disabled).await.unwrap();

        let summary = materializer.regenerate_future_instances(template.id).await.unwrap();
        assert_eq!(summary, RegenerationSummary { removed: 3, created: 0 });
        assert!(due_dates(&store, template.id).await.is_empty());
    }

    #[tokio::test]
    async fn overdue_sweep_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=DAILY", date(2025, 12, 1), 4))
            .await
            .unwrap();
        materializer(&store, date(2025, 12, 1))
            .generate_from_template(template.id)
            .await
            .unwrap();

        let later = materializer(&store, date(2025, 12, 4));
        assert_eq!(later.mark_overdue().await.unwrap(), 3);
        assert_eq!(later.mark_overdue().await.unwrap(), 0);
    }

    /// Delegates to an in-memory store but fails reads for one template.
    struct FlakyStore {
        inner: InMemoryStore,
        broken: Uuid,
    }

    #[async_trait]
    impl TemplateStore for FlakyStore {
        async fn insert_template(&self, template: Template) -> anyhow::Result<Template> {
            self.inner.insert_template(template).await
        }
        async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>> {
            self.inner.get_template(id).await
        }
        async fn update_template(&self, template: Template) -> anyhow::Result<Template> {
            self.inner.update_template(template).await
        }
        async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool> {
            self.inner.delete_template(id).await
        }
        async fn list_recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
            self.inner.list_recurring_templates().await
        }
    }

    #[async_trait]
    impl InstanceStore for FlakyStore {
        async fn existing_due_dates(
            &self,
            template_id: Uuid,
        ) -> anyhow::Result<BTreeSet<NaiveDate>> {
            if template_id == self.broken {
                anyhow::bail!("connection reset");
            }
            self.inner.existing_due_dates(template_id).await
        }
        async fn insert_instances(
            &self,
            instances: Vec<Instance>,
        ) -> anyhow::Result<Vec<Instance>> {
            self.inner.insert_instances(instances).await
        }
        async fn get_instance(&self, id: Uuid) -> anyhow::Result<Option<Instance>> {
            self.inner.get_instance(id).await
        }
        async fn list_instances(&self, template_id: Uuid) -> anyhow::Result<Vec<Instance>> {
            self.inner.list_instances(template_id).await
        }
        async fn find_instances(&self, filter: &InstanceFilter) -> anyhow::Result<Vec<Instance>> {
            self.inner.find_instances(filter).await
        }
        async fn update_instance(&self, instance: Instance) -> anyhow::Result<Instance> {
            self.inner.update_instance(instance).await
        }
        async fn update_instance_status(
            &self,
            id: Uuid,
            change: StatusChange,
        ) -> anyhow::Result<Option<Instance>> {
            self.inner.update_instance_status(id, change).await
        }
        async fn delete_instance(&self, id: Uuid) -> anyhow::Result<bool> {
            self.inner.delete_instance(id).await
        }
        async fn delete_future_instances(
            &self,
            template_id: Uuid,
            from: NaiveDate,
            statuses: &[InstanceStatus],
        ) -> anyhow::Result<u64> {
            self.inner.delete_future_instances(template_id, from, statuses).await
        }
        async fn detach_instances(&self, template_id: Uuid) -> anyhow::Result<u64> {
            self.inner.detach_instances(template_id).await
        }
        async fn mark_overdue_before(
            &self,
            today: NaiveDate,
            from_statuses: &[InstanceStatus],
        ) -> anyhow::Result<u64> {
            self.inner.mark_overdue_before(today, from_statuses).await
        }
        async fn mark_historical_before(&self, today: NaiveDate) -> anyhow::Result<u64> {
            self.inner.mark_historical_before(today).await
        }
    }

    #[tokio::test]
    async fn one_failing_template_does_not_stop_the_batch() {
        let broken = new_template("FREQ=DAILY", date(2025, 12, 1), 9);
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            broken: broken.id,
        });
        store.insert_template(broken.clone()).await.unwrap();
        let healthy = store
            .insert_template(new_template("FREQ=DAILY", date(2025, 12, 1), 9))
            .await
            .unwrap();
        let mut unscheduled = new_template("FREQ=DAILY", date(2025, 12, 1), 9);
        unscheduled.rrule = None;
        store.insert_template(unscheduled).await.unwrap();

        let report = materializer(&store, date(2025, 12, 1))
            .extend_horizons()
            .await
            .unwrap();

        assert_eq!(report.templates, 3);
        assert_eq!(report.generated, 10);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].template_id, broken.id);
        assert_eq!(store.inner.list_instances(healthy.id).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn daily_maintenance_sweeps_then_extends() {
        let store = Arc::new(InMemoryStore::new());
        let template = store
            .insert_template(new_template("FREQ=DAILY", date(2025, 12, 1), 5))
            .await
            .unwrap();
        materializer(&store, date(2025, 12, 1))
            .generate_from_template(template.id)
            .await
            .unwrap();

        let report = materializer(&store, date(2025, 12, 3))
            .run_daily_maintenance()
            .await
            .unwrap();

        assert_eq!(report.overdue, 2);
        assert_eq!(report.historical, 2);
        assert_eq!(report.horizons.generated, 2);
        assert!(report.horizons.failures.is_empty());
        assert_eq!(due_dates(&store, template.id).await.last(), Some(&date(2025, 12, 8)));
    }
}
