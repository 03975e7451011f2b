use std::{net::SocketAddr, sync::Arc};

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use billcycle_core::{
    BillingError, Clock, Instance, InstanceFilter, InstanceUpdate, NewInstance, Store,
    SystemClock, Template, TemplateUpdate,
};
use billcycle_materializer::{
    BillingService, CreatedTemplate, MaintenanceReport, RegenerationSummary, TemplateDeletion,
    UpdatedTemplate,
};
use billcycle_platform::{
    BulkPayRequest, BulkPayResponse, CreateTemplateRequest, DescribeRuleResponse,
    MAINTENANCE_COMPLETED_CHANNEL, MarkPaidRequest, PreviewRuleRequest, PreviewRuleResponse,
    RedisBus, RuleRequest, ServiceConfig, connect_store,
};
use billcycle_recurrence::{CommonPattern, RecurrenceSet, Validation, common_patterns};
use chrono::{Days, NaiveDate};
use tracing::{error, info};
use uuid::Uuid;

const DEFAULT_PREVIEW_LIMIT: usize = 50;
const MAX_PREVIEW_LIMIT: usize = 1_000;
const DEFAULT_PREVIEW_DAYS: u64 = 365;

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
struct AppState {
    billing: Arc<BillingService<dyn Store, Arc<dyn Clock>>>,
    redis: Option<RedisBus>,
    default_days_ahead: u32,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "billcycle_gateway=info,billcycle_materializer=info".to_string()
            }),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let store: Arc<dyn Store> = Arc::new(connect_store(&config.database_url).await?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let redis = RedisBus::connect(&config.redis_url)?;

    let state = AppState {
        billing: Arc::new(BillingService::new(store, clock)),
        redis: Some(redis),
        default_days_ahead: config.generate_days_ahead,
    };

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/recurrence/validate", post(validate_rule))
        .route("/recurrence/describe", post(describe_rule))
        .route("/recurrence/preview", post(preview_rule))
        .route("/recurrence/patterns", get(list_patterns))
        .route("/templates", post(create_template))
        .route(
            "/templates/{template_id}",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/templates/{template_id}/generate", post(generate_instances))
        .route("/templates/{template_id}/regenerate", post(regenerate_instances))
        .route("/templates/{template_id}/instances", get(list_template_instances))
        .route("/instances", get(list_instances).post(create_instance))
        .route("/instances/bulk-pay", post(bulk_pay))
        .route(
            "/instances/{instance_id}",
            get(get_instance).put(update_instance).delete(delete_instance),
        )
        .route("/instances/{instance_id}/pay", post(pay_instance))
        .route("/instances/{instance_id}/cancel", post(cancel_instance))
        .route("/maintenance/run", post(run_maintenance))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn validate_rule(Json(payload): Json<RuleRequest>) -> Json<Validation> {
    Json(billcycle_recurrence::validate(&payload.rrule))
}

async fn describe_rule(Json(payload): Json<RuleRequest>) -> Json<DescribeRuleResponse> {
    let description = billcycle_recurrence::describe(&payload.rrule, payload.dtstart);
    Json(DescribeRuleResponse {
        rrule: payload.rrule,
        description,
    })
}

async fn preview_rule(
    State(state): State<AppState>,
    Json(payload): Json<PreviewRuleRequest>,
) -> ApiResult<PreviewRuleResponse> {
    let rule = billcycle_recurrence::parse(&payload.rrule)
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;

    let from = payload.from.unwrap_or(payload.dtstart);
    let to = match payload.to {
        Some(to) => to,
        None => from
            .checked_add_days(Days::new(DEFAULT_PREVIEW_DAYS))
            .ok_or_else(|| {
                (StatusCode::BAD_REQUEST, "preview window out of range".to_string())
            })?,
    };
    if from > to {
        return Err((StatusCode::BAD_REQUEST, "from must not be after to".to_string()));
    }
    let limit = payload
        .limit
        .unwrap_or(DEFAULT_PREVIEW_LIMIT)
        .min(MAX_PREVIEW_LIMIT);

    let now = state.billing.materializer().clock().now();
    let next = rule.after(payload.dtstart, now);
    let occurrences = RecurrenceSet::new()
        .with_rule(rule)
        .excluding(payload.exclude)
        .first_between(payload.dtstart, from, to, limit);
    let due_dates: Vec<NaiveDate> = occurrences.iter().map(|at| at.date_naive()).collect();

    Ok(Json(PreviewRuleResponse {
        occurrences,
        due_dates,
        next,
    }))
}

async fn list_patterns() -> Json<Vec<CommonPattern>> {
    Json(common_patterns())
}

async fn create_template(
    State(state): State<AppState>,
    Json(payload): Json<CreateTemplateRequest>,
) -> ApiResult<CreatedTemplate> {
    let new = payload.into_new_template(state.default_days_ahead);
    let created = state
        .billing
        .create_template(new)
        .await
        .map_err(billing_error)?;

    announce_generated(&state, created.template.id, &created.instances).await;
    Ok(Json(created))
}

async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<Template> {
    let template = state
        .billing
        .get_template(template_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(template))
}

async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(payload): Json<TemplateUpdate>,
) -> ApiResult<UpdatedTemplate> {
    let updated = state
        .billing
        .update_template(template_id, payload)
        .await
        .map_err(billing_error)?;
    Ok(Json(updated))
}

async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<TemplateDeletion> {
    let deletion = state
        .billing
        .delete_template(template_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(deletion))
}

async fn generate_instances(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<Vec<Instance>> {
    let instances = state
        .billing
        .materializer()
        .generate_from_template(template_id)
        .await
        .map_err(billing_error)?;

    announce_generated(&state, template_id, &instances).await;
    Ok(Json(instances))
}

async fn regenerate_instances(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<RegenerationSummary> {
    let summary = state
        .billing
        .materializer()
        .regenerate_future_instances(template_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(summary))
}

async fn list_template_instances(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> ApiResult<Vec<Instance>> {
    let instances = state
        .billing
        .list_template_instances(template_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(instances))
}

async fn list_instances(
    State(state): State<AppState>,
    Query(filter): Query<InstanceFilter>,
) -> ApiResult<Vec<Instance>> {
    let instances = state
        .billing
        .list_instances(&filter)
        .await
        .map_err(billing_error)?;
    Ok(Json(instances))
}

async fn create_instance(
    State(state): State<AppState>,
    Json(payload): Json<NewInstance>,
) -> ApiResult<Instance> {
    let instance = state
        .billing
        .create_instance(payload)
        .await
        .map_err(billing_error)?;
    Ok(Json(instance))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Instance> {
    let instance = state
        .billing
        .get_instance(instance_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(instance))
}

async fn update_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
    Json(payload): Json<InstanceUpdate>,
) -> ApiResult<Instance> {
    let instance = state
        .billing
        .update_instance(instance_id, payload)
        .await
        .map_err(billing_error)?;
    Ok(Json(instance))
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .billing
        .delete_instance(instance_id)
        .await
        .map_err(billing_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pay_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
    Json(payload): Json<MarkPaidRequest>,
) -> ApiResult<Instance> {
    let instance = state
        .billing
        .mark_paid(instance_id, payload.paid_at, payload.notes)
        .await
        .map_err(billing_error)?;
    Ok(Json(instance))
}

async fn cancel_instance(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> ApiResult<Instance> {
    let instance = state
        .billing
        .cancel_instance(instance_id)
        .await
        .map_err(billing_error)?;
    Ok(Json(instance))
}

async fn bulk_pay(
    State(state): State<AppState>,
    Json(payload): Json<BulkPayRequest>,
) -> ApiResult<BulkPayResponse> {
    let paid = state
        .billing
        .bulk_mark_paid(&payload.instance_ids, payload.paid_at, payload.notes)
        .await
        .map_err(billing_error)?;
    Ok(Json(BulkPayResponse {
        requested: payload.instance_ids.len(),
        paid,
    }))
}

async fn run_maintenance(State(state): State<AppState>) -> ApiResult<MaintenanceReport> {
    let report = state
        .billing
        .materializer()
        .run_daily_maintenance()
        .await
        .map_err(billing_error)?;

    if let Some(redis) = &state.redis {
        if let Err(err) = redis.publish_json(MAINTENANCE_COMPLETED_CHANNEL, &report).await {
            error!("failed to publish maintenance report: {err}");
        }
    }
    Ok(Json(report))
}

async fn announce_generated(state: &AppState, template_id: Uuid, instances: &[Instance]) {
    let Some(redis) = &state.redis else {
        return;
    };
    if let Err(err) = redis.publish_generated(template_id, instances).await {
        error!("failed to publish generated instances for {template_id}: {err}");
    }
}

fn billing_error(err: BillingError) -> ApiError {
    let status = match &err {
        BillingError::InvalidSpecification(_) | BillingError::Validation(_) => {
            StatusCode::BAD_REQUEST
        }
        BillingError::TemplateNotFound(_) | BillingError::InstanceNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        BillingError::HistoricalRecordImmutable(_) | BillingError::DuplicateDueDate => {
            StatusCode::CONFLICT
        }
        BillingError::TemplateNotRecurring(_) | BillingError::InvalidTransition { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        BillingError::Store(_) => return internal_error(err),
    };
    (status, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> ApiError {
    error!("request failed: {err}");
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
