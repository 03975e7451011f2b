use std::{sync::Arc, time::Duration};

use anyhow::Result;
use billcycle_core::{Clock, Store, SystemClock};
use billcycle_materializer::{InstanceMaterializer, MaintenanceReport};
use billcycle_platform::{MAINTENANCE_COMPLETED_CHANNEL, RedisBus, ServiceConfig, connect_store};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "billcycle_jobs=info,billcycle_materializer=info".to_string()),
        )
        .init();

    let config = ServiceConfig::worker_from_env()?;
    let store = Arc::new(connect_store(&config.database_url).await?);
    let redis = RedisBus::connect(&config.redis_url)?;
    let materializer = InstanceMaterializer::new(store, SystemClock);

    let period = Duration::from_secs(config.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = period.as_secs(), "maintenance worker started");

    loop {
        ticker.tick().await;
        if let Err(err) = sweep(&materializer, Some(&redis)).await {
            error!("maintenance sweep failed: {err:#}");
        }
    }
}

/// One maintenance pass. A failed publish is logged and does not fail the
/// sweep, the instance changes are already committed by then.
async fn sweep<S, C>(
    materializer: &InstanceMaterializer<S, C>,
    redis: Option<&RedisBus>,
) -> Result<MaintenanceReport>
where
    S: Store + ?Sized,
    C: Clock,
{
    let report = materializer.run_daily_maintenance().await?;

    for failure in &report.horizons.failures {
        warn!(template_id = %failure.template_id, "template skipped: {}", failure.error);
    }
    info!(
        overdue = report.overdue,
        historical = report.historical,
        generated = report.horizons.generated,
        "maintenance sweep finished"
    );

    if let Some(redis) = redis {
        if let Err(err) = redis.publish_json(MAINTENANCE_COMPLETED_CHANNEL, &report).await {
            error!("failed to publish maintenance report: {err:#}");
        }
    }
    Ok(report)
}
