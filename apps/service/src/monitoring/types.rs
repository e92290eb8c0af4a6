use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::database::models::Monitor;

/// Status of a heartbeat.
///
/// The numeric codes are persisted and serialized as plain integers, so they
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MonitorStatus {
    Down = 0,
    Up = 1,
    Pending = 2,
    Maintenance = 3,
}

#[derive(Debug, Error)]
#[error("unknown monitor status code {0}")]
pub struct UnknownStatus(pub i64);

impl MonitorStatus {
    /// Swaps UP and DOWN, leaves the other states untouched.
    pub fn flip(self) -> Self {
        match self {
            MonitorStatus::Up => MonitorStatus::Down,
            MonitorStatus::Down => MonitorStatus::Up,
            other => other,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Result<Self, UnknownStatus> {
        match code {
            0 => Ok(MonitorStatus::Down),
            1 => Ok(MonitorStatus::Up),
            2 => Ok(MonitorStatus::Pending),
            3 => Ok(MonitorStatus::Maintenance),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl From<MonitorStatus> for u8 {
    fn from(status: MonitorStatus) -> Self {
        status.code()
    }
}

impl TryFrom<u8> for MonitorStatus {
    type Error = UnknownStatus;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(i64::from(code))
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Up => write!(f, "up"),
            MonitorStatus::Down => write!(f, "down"),
            MonitorStatus::Pending => write!(f, "pending"),
            MonitorStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// One recorded probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Store id, `None` until appended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(rename = "monitorID")]
    pub monitor_id: i64,

    pub time: DateTime<Utc>,

    pub status: MonitorStatus,

    pub msg: String,

    /// Round trip in milliseconds
    pub ping: Option<u64>,

    /// Seconds since the previous beat of the same monitor
    pub duration: u64,

    pub important: bool,

    pub retries: u32,

    /// Unimportant DOWN beats since the last notification
    pub down_count: u32,
}

impl Heartbeat {
    /// Blank beat for `monitor` at `time`.
    ///
    /// The status starts out as failed: DOWN, or UP for an upside-down
    /// monitor, and a checker has to prove otherwise.
    pub fn draft(monitor: &Monitor, time: DateTime<Utc>, previous: Option<&Heartbeat>) -> Self {
        let status = if monitor.upside_down {
            MonitorStatus::Up
        } else {
            MonitorStatus::Down
        };

        Self {
            id: None,
            monitor_id: monitor.id,
            time,
            status,
            msg: String::new(),
            ping: None,
            duration: previous.map_or(0, |previous| seconds_between(previous.time, time)),
            important: false,
            retries: 0,
            down_count: previous.map_or(0, |previous| previous.down_count),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Whole seconds from `earlier` to `later`, clamped at zero.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u64 {
    u64::try_from((later - earlier).num_seconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(MonitorStatus::Down.code(), 0);
        assert_eq!(MonitorStatus::Up.code(), 1);
        assert_eq!(MonitorStatus::Pending.code(), 2);
        assert_eq!(MonitorStatus::Maintenance.code(), 3);
        assert!(MonitorStatus::from_code(7).is_err());
    }

    #[test]
    fn status_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&MonitorStatus::Pending).unwrap(), "2");
        let parsed: MonitorStatus = serde_json::from_str("1").unwrap();
        assert_eq!(parsed, MonitorStatus::Up);
        assert!(serde_json::from_str::<MonitorStatus>("9").is_err());
    }

    #[test]
    fn flip_only_touches_up_and_down() {
        assert_eq!(MonitorStatus::Up.flip(), MonitorStatus::Down);
        assert_eq!(MonitorStatus::Down.flip(), MonitorStatus::Up);
        assert_eq!(MonitorStatus::Pending.flip(), MonitorStatus::Pending);
        assert_eq!(MonitorStatus::Maintenance.flip(), MonitorStatus::Maintenance);
    }

    #[test]
    fn draft_starts_failed_and_measures_duration() {
        let mut monitor = Monitor::new("api", "http");
        monitor.id = 4;
        let now = Utc::now();

        let first = Heartbeat::draft(&monitor, now, None);
        assert_eq!(first.status, MonitorStatus::Down);
        assert_eq!(first.duration, 0);
        assert_eq!(first.monitor_id, 4);

        let mut previous = first.clone();
        previous.time = now - Duration::seconds(61);
        previous.down_count = 2;
        let second = Heartbeat::draft(&monitor, now, Some(&previous));
        assert_eq!(second.duration, 61);
        assert_eq!(second.down_count, 2);

        monitor.upside_down = true;
        assert_eq!(Heartbeat::draft(&monitor, now, None).status, MonitorStatus::Up);
    }

    #[test]
    fn json_uses_wire_names() {
        let monitor = Monitor::new("api", "http");
        let mut beat = Heartbeat::draft(&monitor, Utc::now(), None);
        beat.msg = "Connection failed".into();

        let full = beat.to_json();
        assert_eq!(full["status"], 0);
        assert_eq!(full["msg"], "Connection failed");
        assert!(full.get("monitorID").is_some());
        assert!(full.get("downCount").is_some());
        assert!(full.get("id").is_none());
    }
}
