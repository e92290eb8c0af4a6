//! Passive monitors: external systems report in through a push token and the
//! runner only checks that a report arrived inside the window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::transition;
use super::types::{Heartbeat, MonitorStatus, seconds_between};
use crate::bus::EventBus;
use crate::database::{Database, models::Monitor};
use crate::notification::NotificationDispatcher;

pub const NO_HEARTBEAT_MESSAGE: &str = "No heartbeat in the time window";

/// Slack granted to pushes arriving just after the window closes
const BUFFER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushWindow {
    /// A push landed in time; look again after `recheck_in`
    Satisfied { recheck_in: Duration },
    /// Nothing arrived; `since_last` seconds passed since the last beat
    Missed { since_last: u64 },
}

/// Status a push must have stored for the monitor to count as reporting
fn healthy_status(monitor: &Monitor) -> MonitorStatus {
    if monitor.upside_down {
        MonitorStatus::Down
    } else {
        MonitorStatus::Up
    }
}

/// Decides whether the last stored beat still covers `now`.
pub fn window_state(monitor: &Monitor, previous: Option<&Heartbeat>, now: DateTime<Utc>) -> PushWindow {
    let Some(previous) = previous else {
        return PushWindow::Missed { since_last: monitor.interval };
    };

    let window = Duration::from_secs(monitor.interval);
    let elapsed = (now - previous.time).to_std().unwrap_or(Duration::ZERO);

    if previous.status != healthy_status(monitor) || elapsed > window + BUFFER {
        return PushWindow::Missed { since_last: seconds_between(previous.time, now) };
    }

    let remaining = window.checked_sub(elapsed).unwrap_or(Duration::ZERO);
    PushWindow::Satisfied { recheck_in: remaining + BUFFER }
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("Monitor not found or not active.")]
    MonitorNotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Query of a push call: `?status=up&msg=OK&ping=12`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub ping: Option<u64>,
}

impl PushRequest {
    pub fn up() -> Self {
        Self::default()
    }

    fn status(&self) -> MonitorStatus {
        match self.status.as_deref() {
            None | Some("up") => MonitorStatus::Up,
            Some(_) => MonitorStatus::Down,
        }
    }
}

/// Records pushes and alerts on transitions, using the same rules as the
/// runner.
pub struct PushReceiver {
    database: Arc<dyn Database>,
    dispatcher: Arc<NotificationDispatcher>,
    bus: EventBus,
}

impl PushReceiver {
    pub fn new(database: Arc<dyn Database>, dispatcher: Arc<NotificationDispatcher>, bus: EventBus) -> Self {
        Self { database, dispatcher, bus }
    }

    pub async fn accept(&self, token: &str, request: PushRequest) -> Result<Heartbeat, PushError> {
        let monitor = self
            .database
            .get_monitor_by_push_token(token)
            .await?
            .filter(|monitor| monitor.active && monitor.is_push())
            .ok_or(PushError::MonitorNotFound)?;

        let previous = self.database.find_previous_heartbeat(monitor.id).await?;

        let mut status = request.status();
        if monitor.upside_down {
            status = status.flip();
        }

        let mut heartbeat = Heartbeat::draft(&monitor, Utc::now(), previous.as_ref());
        heartbeat.status = status;
        heartbeat.msg = request.msg.clone().unwrap_or_else(|| "OK".into());
        heartbeat.ping = request.ping;
        heartbeat.down_count = 0;
        heartbeat.important =
            transition::is_important_beat(previous.is_none(), previous.as_ref().map(|previous| previous.status), status);

        debug!(monitor_id = monitor.id, %status, important = heartbeat.important, "Push received");

        heartbeat.id = Some(self.database.append_heartbeat(&heartbeat).await?);

        self.bus.publish_heartbeat(&heartbeat);
        self.bus.refresh_stats(Arc::clone(&self.database), monitor.id);

        if heartbeat.important {
            let delivered = self.dispatcher.notify(&monitor, &heartbeat).await;
            info!(monitor_id = monitor.id, delivered, "Push changed monitor state");
        }

        Ok(heartbeat)
    }
}
