use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::models::{Monitor, NotificationConfig};
use super::repository::Database;
use crate::monitoring::types::Heartbeat;

#[derive(Default)]
struct MemoryState {
    monitors: BTreeMap<i64, Monitor>,
    heartbeats: HashMap<i64, Vec<Heartbeat>>,
    settings: HashMap<String, String>,
    notifications: BTreeMap<i64, NotificationConfig>,
    links: BTreeSet<(i64, i64)>,
    next_monitor_id: i64,
    next_heartbeat_id: i64,
    next_notification_id: i64,
}

/// Process-local store, lost on exit
#[derive(Default)]
pub struct MemoryDatabase {
    state: RwLock<MemoryState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get_active_monitors(&self) -> Result<Vec<Monitor>> {
        let state = self.state.read().await;
        Ok(state.monitors.values().filter(|monitor| monitor.active).cloned().collect())
    }

    async fn get_monitor(&self, id: i64) -> Result<Option<Monitor>> {
        Ok(self.state.read().await.monitors.get(&id).cloned())
    }

    async fn get_monitor_by_push_token(&self, token: &str) -> Result<Option<Monitor>> {
        let state = self.state.read().await;
        Ok(state
            .monitors
            .values()
            .find(|monitor| monitor.active && monitor.push_token.as_deref() == Some(token))
            .cloned())
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<i64> {
        let mut state = self.state.write().await;
        let mut stored = monitor.clone();
        if stored.id == 0 {
            state.next_monitor_id += 1;
            stored.id = state.next_monitor_id;
        } else {
            stored.updated_at = Utc::now();
            state.next_monitor_id = state.next_monitor_id.max(stored.id);
        }
        let id = stored.id;
        state.monitors.insert(id, stored);
        Ok(id)
    }

    async fn find_children(&self, parent_id: i64) -> Result<Vec<Monitor>> {
        let state = self.state.read().await;
        Ok(state
            .monitors
            .values()
            .filter(|monitor| monitor.parent == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn find_last_heartbeat(&self, monitor_id: i64) -> Result<Option<Heartbeat>> {
        let state = self.state.read().await;
        Ok(state
            .heartbeats
            .get(&monitor_id)
            .and_then(|beats| beats.iter().max_by_key(|beat| (beat.time, beat.id)))
            .cloned())
    }

    async fn append_heartbeat(&self, heartbeat: &Heartbeat) -> Result<i64> {
        let mut state = self.state.write().await;
        state.next_heartbeat_id += 1;
        let id = state.next_heartbeat_id;

        let mut stored = heartbeat.clone();
        stored.id = Some(id);
        state.heartbeats.entry(heartbeat.monitor_id).or_default().push(stored);
        Ok(id)
    }

    async fn heartbeats_since(&self, monitor_id: i64, since: DateTime<Utc>) -> Result<Vec<Heartbeat>> {
        let state = self.state.read().await;
        let mut beats: Vec<Heartbeat> = state
            .heartbeats
            .get(&monitor_id)
            .map(|beats| beats.iter().filter(|beat| beat.time >= since).cloned().collect())
            .unwrap_or_default();
        beats.sort_by_key(|beat| (beat.time, beat.id));
        Ok(beats)
    }

    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for beats in state.heartbeats.values_mut() {
            let before = beats.len();
            beats.retain(|beat| beat.time >= cutoff);
            deleted += (before - beats.len()) as u64;
        }
        Ok(deleted)
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.settings.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.state.write().await.settings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn save_notification(&self, notification: &NotificationConfig) -> Result<i64> {
        let mut state = self.state.write().await;
        let mut stored = notification.clone();
        if stored.id == 0 {
            state.next_notification_id += 1;
            stored.id = state.next_notification_id;
        }
        let id = stored.id;
        state.notifications.insert(id, stored);
        Ok(id)
    }

    async fn link_notification(&self, monitor_id: i64, notification_id: i64) -> Result<()> {
        self.state.write().await.links.insert((monitor_id, notification_id));
        Ok(())
    }

    async fn notifications_for_monitor(&self, monitor_id: i64) -> Result<Vec<NotificationConfig>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .iter()
            .filter(|(linked_monitor, _)| *linked_monitor == monitor_id)
            .filter_map(|(_, notification_id)| state.notifications.get(notification_id))
            .cloned()
            .collect())
    }
}
