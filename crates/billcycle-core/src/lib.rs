pub mod clock;
pub mod error;
pub mod models;
pub mod status;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{BillingError, BillingResult};
pub use models::{
    DEFAULT_CURRENCY, DEFAULT_DAYS_AHEAD, EntryKind, Instance, InstanceFilter, InstanceUpdate,
    NewInstance, NewTemplate, Priority, Template, TemplateUpdate,
};
pub use status::InstanceStatus;
pub use storage::{InstanceStore, StatusChange, Store, TemplateStore};
