pub mod materializer;
pub mod service;

pub use materializer::{
    BatchReport, InstanceMaterializer, MaintenanceReport, RegenerationSummary, TemplateFailure,
};
pub use service::{
    BillingService, CreatedTemplate, MAX_DAYS_AHEAD, TemplateDeletion, UpdatedTemplate,
};
