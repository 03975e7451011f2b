use anyhow::Result;
use billcycle_core::Instance;
use chrono::Utc;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::contracts::{INSTANCES_GENERATED_CHANNEL, InstancesGeneratedEvent};

#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let receivers: i64 = connection.publish(channel, serialized).await?;
        debug!(channel, receivers, "published event");
        Ok(())
    }

    /// Announces freshly materialized instances. Publishes nothing for an
    /// empty batch.
    pub async fn publish_generated(&self, template_id: Uuid, instances: &[Instance]) -> Result<()> {
        match InstancesGeneratedEvent::from_instances(template_id, instances, Utc::now()) {
            Some(event) => self.publish_json(INSTANCES_GENERATED_CHANNEL, &event).await,
            None => Ok(()),
        }
    }
}
