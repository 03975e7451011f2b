use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use billcycle_core::{
    Instance, InstanceFilter, InstanceStatus, InstanceStore, Priority, StatusChange, Template,
    TemplateStore,
};
use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

const TEMPLATE_COLUMNS: &str = "id, user_id, kind, title, description, amount, currency, \
     category_id, priority, is_recurring, rrule, dtstart, dtend, auto_generate_days_ahead, \
     is_active, skipped_dates, notes, created_at, updated_at";

const INSTANCE_COLUMNS: &str = "id, user_id, template_id, kind, title, description, amount, \
     currency, category_id, priority, due_date, status, is_recurring, is_historical, paid_at, \
     notes, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the billing tables and constraints when they are missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("failed to apply billing schema")?;
        info!("billing schema ready");
        Ok(())
    }
}

fn status_names(statuses: &[InstanceStatus]) -> Vec<String> {
    statuses.iter().map(|status| status.as_str().to_string()).collect()
}

/// `%needle%` for ILIKE with the needle's own wildcards escaped.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for ch in needle.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

fn priority_from_column(raw: i16) -> anyhow::Result<Priority> {
    let value = u8::try_from(raw).with_context(|| format!("priority {raw} out of range"))?;
    Ok(Priority::new(value)?)
}

fn template_from_row(row: &PgRow) -> anyhow::Result<Template> {
    let kind: String = row.try_get("kind")?;
    let days_ahead: i32 = row.try_get("auto_generate_days_ahead")?;
    let skipped: Vec<NaiveDate> = row.try_get("skipped_dates")?;

    Ok(Template {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        kind: kind.parse()?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        category_id: row.try_get("category_id")?,
        priority: priority_from_column(row.try_get("priority")?)?,
        is_recurring: row.try_get("is_recurring")?,
        rrule: row.try_get("rrule")?,
        dtstart: row.try_get("dtstart")?,
        dtend: row.try_get("dtend")?,
        auto_generate_days_ahead: u32::try_from(days_ahead)
            .with_context(|| format!("negative generation horizon {days_ahead}"))?,
        is_active: row.try_get("is_active")?,
        skipped_dates: skipped.into_iter().collect(),
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn instance_from_row(row: &PgRow) -> anyhow::Result<Instance> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;

    Ok(Instance {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        template_id: row.try_get("template_id")?,
        kind: kind.parse()?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        category_id: row.try_get("category_id")?,
        priority: priority_from_column(row.try_get("priority")?)?,
        due_date: row.try_get("due_date")?,
        status: status.parse()?,
        is_recurring: row.try_get("is_recurring")?,
        is_historical: row.try_get("is_historical")?,
        paid_at: row.try_get("paid_at")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn days_ahead_column(template: &Template) -> anyhow::Result<i32> {
    i32::try_from(template.auto_generate_days_ahead).context("generation horizon too large")
}

#[async_trait]
impl TemplateStore for PgStore {
    async fn insert_template(&self, template: Template) -> anyhow::Result<Template> {
        let skipped: Vec<NaiveDate> = template.skipped_dates.iter().copied().collect();

        sqlx::query(
            r#"
            INSERT INTO billing_templates (
                id, user_id, kind, title, description, amount, currency, category_id, priority,
                is_recurring, rrule, dtstart, dtend, auto_generate_days_ahead, is_active,
                skipped_dates, notes, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
            "#,
        )
        .bind(template.id)
        .bind(template.user_id)
        .bind(template.kind.as_str())
        .bind(&template.title)
        .bind(&template.description)
        .bind(template.amount)
        .bind(&template.currency)
        .bind(template.category_id)
        .bind(i16::from(template.priority.get()))
        .bind(template.is_recurring)
        .bind(&template.rrule)
        .bind(template.dtstart)
        .bind(template.dtend)
        .bind(days_ahead_column(&template)?)
        .bind(template.is_active)
        .bind(&skipped)
        .bind(&template.notes)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> anyhow::Result<Option<Template>> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM billing_templates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(template_from_row).transpose()
    }

    async fn update_template(&self, template: Template) -> anyhow::Result<Template> {
        let skipped: Vec<NaiveDate> = template.skipped_dates.iter().copied().collect();

        let result = sqlx::query(
            r#"
            UPDATE billing_templates
            SET kind = $2, title = $3, description = $4, amount = $5, currency = $6,
                category_id = $7, priority = $8, is_recurring = $9, rrule = $10, dtstart = $11,
                dtend = $12, auto_generate_days_ahead = $13, is_active = $14,
                skipped_dates = $15, notes = $16, updated_at = $17
            WHERE id = $1
            "#,
        )
        .bind(template.id)
        .bind(template.kind.as_str())
        .bind(&template.title)
        .bind(&template.description)
        .bind(template.amount)
        .bind(&template.currency)
        .bind(template.category_id)
        .bind(i16::from(template.priority.get()))
        .bind(template.is_recurring)
        .bind(&template.rrule)
        .bind(template.dtstart)
        .bind(template.dtend)
        .bind(days_ahead_column(&template)?)
        .bind(template.is_active)
        .bind(&skipped)
        .bind(&template.notes)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("template {} does not exist", template.id);
        }
        Ok(template)
    }

    async fn delete_template(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM billing_templates WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_recurring_templates(&self) -> anyhow::Result<Vec<Template>> {
        let rows = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM billing_templates \
             WHERE is_active AND is_recurring ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(template_from_row).collect()
    }
}

#[async_trait]
impl InstanceStore for PgStore {
    async fn existing_due_dates(&self, template_id: Uuid) -> anyhow::Result<BTreeSet<NaiveDate>> {
        let rows = sqlx::query("SELECT due_date FROM billing_instances WHERE template_id = $1")
            .bind(template_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<NaiveDate, _>("due_date").map_err(Into::into))
            .collect()
    }

    async fn insert_instances(&self, instances: Vec<Instance>) -> anyhow::Result<Vec<Instance>> {
        if instances.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(instances.len());

        for instance in instances {
            let written = sqlx::query(
                r#"
                INSERT INTO billing_instances (
                    id, user_id, template_id, kind, title, description, amount, currency,
                    category_id, priority, due_date, status, is_recurring, is_historical,
                    paid_at, notes, created_at, updated_at
                )
                VALUES (
                    $1, $2, $3, $4, $5, $6, $7, $8, $9,
                    $10, $11, $12, $13, $14, $15, $16, $17, $18
                )
                ON CONFLICT (template_id, due_date) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(instance.id)
            .bind(instance.user_id)
            .bind(instance.template_id)
            .bind(instance.kind.as_str())
            .bind(&instance.title)
            .bind(&instance.description)
            .bind(instance.amount)
            .bind(&instance.currency)
            .bind(instance.category_id)
            .bind(i16::from(instance.priority.get()))
            .bind(instance.due_date)
            .bind(instance.status.as_str())
            .bind(instance.is_recurring)
            .bind(instance.is_historical)
            .bind(instance.paid_at)
            .bind(&instance.notes)
            .bind(instance.created_at)
            .bind(instance.updated_at)
            .fetch_optional(&mut *tx)
            .await?;

            if written.is_some() {
                inserted.push(instance);
            }
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_instance(&self, id: Uuid) -> anyhow::Result<Option<Instance>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM billing_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn list_instances(&self, template_id: Uuid) -> anyhow::Result<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM billing_instances \
             WHERE template_id = $1 ORDER BY due_date"
        ))
        .bind(template_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    async fn find_instances(&self, filter: &InstanceFilter) -> anyhow::Result<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {INSTANCE_COLUMNS} FROM billing_instances
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::uuid IS NULL OR category_id = $4)
              AND ($5::date IS NULL OR due_date >= $5)
              AND ($6::date IS NULL OR due_date <= $6)
              AND ($7::boolean IS NULL OR is_recurring = $7)
              AND ($8::text IS NULL OR title ILIKE $8 OR description ILIKE $8)
            ORDER BY due_date, created_at
            "#
        ))
        .bind(filter.user_id)
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.category_id)
        .bind(filter.due_from)
        .bind(filter.due_to)
        .bind(filter.is_recurring)
        .bind(filter.search.as_deref().map(like_pattern))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(instance_from_row).collect()
    }

    async fn update_instance(&self, instance: Instance) -> anyhow::Result<Instance> {
        let result = sqlx::query(
            r#"
            UPDATE billing_instances
            SET title = $2, description = $3, amount = $4, currency = $5, category_id = $6,
                priority = $7, due_date = $8, notes = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(instance.id)
        .bind(&instance.title)
        .bind(&instance.description)
        .bind(instance.amount)
        .bind(&instance.currency)
        .bind(instance.category_id)
        .bind(i16::from(instance.priority.get()))
        .bind(instance.due_date)
        .bind(&instance.notes)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("instance {} does not exist", instance.id);
        }
        Ok(instance)
    }

    async fn update_instance_status(
        &self,
        id: Uuid,
        change: StatusChange,
    ) -> anyhow::Result<Option<Instance>> {
        let row = sqlx::query(&format!(
            "UPDATE billing_instances \
             SET status = $2, paid_at = COALESCE($3, paid_at), notes = COALESCE($4, notes), \
                 updated_at = $5 \
             WHERE id = $1 RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(id)
        .bind(change.status.as_str())
        .bind(change.paid_at)
        .bind(&change.notes)
        .bind(change.updated_at)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn delete_instance(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM billing_instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_future_instances(
        &self,
        template_id: Uuid,
        from: NaiveDate,
        statuses: &[InstanceStatus],
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM billing_instances
            WHERE template_id = $1
              AND due_date >= $2
              AND NOT is_historical
              AND status = ANY($3)
            "#,
        )
        .bind(template_id)
        .bind(from)
        .bind(status_names(statuses))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn detach_instances(&self, template_id: Uuid) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE billing_instances
            SET template_id = NULL, updated_at = $2
            WHERE template_id = $1
            "#,
        )
        .bind(template_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_overdue_before(
        &self,
        today: NaiveDate,
        from_statuses: &[InstanceStatus],
    ) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE billing_instances
            SET status = 'overdue', updated_at = $3
            WHERE due_date < $1 AND status = ANY($2)
            "#,
        )
        .bind(today)
        .bind(status_names(from_statuses))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_historical_before(&self, today: NaiveDate) -> anyhow::Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE billing_instances
            SET is_historical = TRUE
            WHERE due_date < $1 AND NOT is_historical
            "#,
        )
        .bind(today)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
