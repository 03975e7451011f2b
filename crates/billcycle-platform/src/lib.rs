pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    BulkPayRequest, BulkPayResponse, CreateTemplateRequest, DescribeRuleResponse,
    INSTANCES_GENERATED_CHANNEL, InstancesGeneratedEvent, MAINTENANCE_COMPLETED_CHANNEL,
    MarkPaidRequest, PreviewRuleRequest, PreviewRuleResponse, RuleRequest,
};
pub use db::{connect_database, connect_store};
pub use redis_bus::RedisBus;
