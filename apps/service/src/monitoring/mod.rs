/// Monitoring engine module - schedules checks and turns their outcomes into heartbeats
///
/// This module is responsible for:
/// - Executing checks through the per-type registry
/// - Running one loop per active monitor
/// - Deciding retries, importance and notifications
/// - Accepting external pushes for passive monitors
pub mod checker;
pub mod checkers;
pub mod executor;
pub mod push;
pub mod runner;
pub mod scheduler;
pub mod transition;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testing;

pub use checker::{CheckError, Checker};
pub use executor::MonitoringExecutor;
pub use push::{PushError, PushReceiver, PushRequest};
pub use runner::{EngineContext, MonitorRunner};
pub use scheduler::{MonitoringScheduler, SchedulerError};
pub use types::{Heartbeat, MonitorStatus};
