mod client;
mod dispatcher;
mod error;
mod orchestrator;
mod protocol;
mod schedule;
mod types;
mod zones;

pub use client::{HubClient, HubClientBuilder};
pub use dispatcher::DeviceCommandDispatcher;
pub use error::{Error, Result};
pub use orchestrator::{DEFAULT_MODE_ENTITY, ModeInfo, ModeOrchestrator, PendingRestoreInfo};
pub use schedule::{DEFAULT_SCHEDULE_ID, ECO_SCHEDULE_ID, ScheduleCatalog, WEEKEND_DAY_TYPE};
pub use types::*;
pub use zones::{ZoneDirectory, ZoneStatus};
