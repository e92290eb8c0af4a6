use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::database::Database;
use crate::monitoring::types::Heartbeat;
use crate::stats::{self, MonitorStats};

/// Default number of events a slow subscriber may fall behind
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Heartbeat(Heartbeat),
    Stats(MonitorStats),
}

/// Fire-and-forget fan-out of monitor events to live subscribers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    pub fn publish_heartbeat(&self, heartbeat: &Heartbeat) {
        debug!(monitor_id = heartbeat.monitor_id, status = %heartbeat.status, "Bus: publishing heartbeat");
        self.publish(MonitorEvent::Heartbeat(heartbeat.clone()));
    }

    pub fn publish_stats(&self, stats: MonitorStats) {
        self.publish(MonitorEvent::Stats(stats));
    }

    /// Recomputes the monitor's aggregates in the background and publishes
    /// them. Skipped while nobody listens.
    pub fn refresh_stats(&self, database: Arc<dyn Database>, monitor_id: i64) {
        if self.tx.receiver_count() == 0 {
            return;
        }

        let bus = self.clone();
        tokio::spawn(async move {
            match stats::compute(database.as_ref(), monitor_id, Utc::now()).await {
                Ok(stats) => bus.publish_stats(stats),
                Err(error) => warn!(monitor_id, error = %format!("{error:#}"), "Unable to compute monitor stats"),
            }
        });
    }

    fn publish(&self, event: MonitorEvent) {
        // Ignore errors if there are no receivers
        let _ = self.tx.send(event);
    }
}
