//! Aggregates shown next to a monitor: duration-weighted uptime and average
//! ping over a time window.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::database::Database;
use crate::monitoring::types::{Heartbeat, MonitorStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    #[serde(rename = "monitorID")]
    pub monitor_id: i64,
    pub avg_ping_24h: Option<f64>,
    /// Ratio between 0 and 1
    pub uptime_24h: f64,
    pub uptime_30d: f64,
}

/// Share of `window` the monitor was not DOWN, weighting each beat by its
/// duration. A beat whose duration reaches back past the window only counts
/// the part inside it.
pub fn uptime_ratio(beats: &[Heartbeat], window: Duration, now: DateTime<Utc>) -> f64 {
    let window_start = now - window;
    let beats: Vec<&Heartbeat> = beats.iter().filter(|beat| beat.time >= window_start).collect();

    match beats.as_slice() {
        [] => return 0.0,
        [only] => return if only.status == MonitorStatus::Down { 0.0 } else { 1.0 },
        _ => {}
    }

    let window_seconds = window.num_seconds().max(0) as u64;
    let mut total = 0u64;
    let mut downtime = 0u64;

    for beat in &beats {
        let inside = crate::monitoring::types::seconds_between(window_start, beat.time);
        let weight = beat.duration.min(inside).min(window_seconds);
        total += weight;
        if beat.status == MonitorStatus::Down {
            downtime += weight;
        }
    }

    if total == 0 {
        let up = beats.iter().filter(|beat| beat.status != MonitorStatus::Down).count();
        return up as f64 / beats.len() as f64;
    }

    (total - downtime) as f64 / total as f64
}

/// Mean of the recorded pings, `None` when no beat carries one
pub fn average_ping(beats: &[Heartbeat]) -> Option<f64> {
    let pings: Vec<u64> = beats.iter().filter_map(|beat| beat.ping).collect();
    if pings.is_empty() {
        None
    } else {
        Some(pings.iter().sum::<u64>() as f64 / pings.len() as f64)
    }
}

/// Loads the last 30 days of beats and derives every figure from them.
pub async fn compute(database: &dyn Database, monitor_id: i64, now: DateTime<Utc>) -> Result<MonitorStats> {
    let month = database.heartbeats_since(monitor_id, now - Duration::days(30)).await?;
    let day_start = now - Duration::hours(24);
    let day: Vec<Heartbeat> = month.iter().filter(|beat| beat.time >= day_start).cloned().collect();

    Ok(MonitorStats {
        monitor_id,
        avg_ping_24h: average_ping(&day),
        uptime_24h: uptime_ratio(&day, Duration::hours(24), now),
        uptime_30d: uptime_ratio(&month, Duration::days(30), now),
    })
}
