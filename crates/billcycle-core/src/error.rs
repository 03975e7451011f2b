use thiserror::Error;
use uuid::Uuid;

use crate::status::InstanceStatus;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("invalid recurrence specification: {0}")]
    InvalidSpecification(String),

    #[error("template {0} not found")]
    TemplateNotFound(Uuid),

    #[error("template {0} has no active recurrence to materialize")]
    TemplateNotRecurring(Uuid),

    #[error("instance {0} not found")]
    InstanceNotFound(Uuid),

    #[error("instance {0} is historical and cannot be changed")]
    HistoricalRecordImmutable(Uuid),

    #[error("cannot move an instance from {from} to {to}")]
    InvalidTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("the template already has an instance on that due date")]
    DuplicateDueDate,

    #[error("{0}")]
    Validation(String),

    #[error("store failure: {0}")]
    Store(#[from] anyhow::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;
