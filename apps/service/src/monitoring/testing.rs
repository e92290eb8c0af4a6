//! Fixtures shared by the runner and scheduler tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::checker::{CheckError, Checker};
use super::executor::MonitoringExecutor;
use super::runner::EngineContext;
use super::types::{Heartbeat, MonitorStatus};
use crate::bus::EventBus;
use crate::database::{Database, MemoryDatabase, models::Monitor, models::NotificationConfig};
use crate::notification::{NotificationDispatcher, NotificationProvider, SenderError};

pub const STUB_TYPE: &str = "stub";

#[derive(Debug, Clone)]
pub enum Step {
    Status(MonitorStatus),
    Fail(&'static str),
    Panic,
    /// Up after sleeping this many seconds
    Slow(u64),
}

/// Plays back a script of outcomes, repeating the last one forever
pub struct ScriptedChecker {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedChecker {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(Step::Status(MonitorStatus::Up)),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most checks that were ever running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    async fn check(&self, _monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let step = match self.script.lock().await.pop_front() {
            Some(step) => {
                *self.last.lock().await = step.clone();
                step
            }
            None => self.last.lock().await.clone(),
        };

        match step {
            Step::Status(status) => {
                heartbeat.status = status;
                heartbeat.msg = "scripted".into();
                Ok(())
            }
            Step::Fail(reason) => Err(CheckError::Network(reason.into())),
            Step::Panic => panic!("scripted checker panic"),
            Step::Slow(seconds) => {
                let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(running, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);

                heartbeat.status = MonitorStatus::Up;
                heartbeat.msg = "scripted".into();
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingProvider {
    pub sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationProvider for RecordingProvider {
    async fn send(&self, _: &Value, message: &str, _: Option<&Value>, _: Option<&Value>) -> Result<(), SenderError> {
        self.sent.lock().await.push(message.to_string());
        Ok(())
    }
}

/// Store whose heartbeat appends always fail; every other call goes through
pub struct RejectingAppends(pub Arc<MemoryDatabase>);

#[async_trait]
impl Database for RejectingAppends {
    async fn get_active_monitors(&self) -> anyhow::Result<Vec<Monitor>> {
        self.0.get_active_monitors().await
    }

    async fn get_monitor(&self, id: i64) -> anyhow::Result<Option<Monitor>> {
        self.0.get_monitor(id).await
    }

    async fn get_monitor_by_push_token(&self, token: &str) -> anyhow::Result<Option<Monitor>> {
        self.0.get_monitor_by_push_token(token).await
    }

    async fn save_monitor(&self, monitor: &Monitor) -> anyhow::Result<i64> {
        self.0.save_monitor(monitor).await
    }

    async fn find_children(&self, parent_id: i64) -> anyhow::Result<Vec<Monitor>> {
        self.0.find_children(parent_id).await
    }

    async fn find_last_heartbeat(&self, monitor_id: i64) -> anyhow::Result<Option<Heartbeat>> {
        self.0.find_last_heartbeat(monitor_id).await
    }

    async fn append_heartbeat(&self, _: &Heartbeat) -> anyhow::Result<i64> {
        anyhow::bail!("disk I/O error")
    }

    async fn heartbeats_since(&self, monitor_id: i64, since: DateTime<Utc>) -> anyhow::Result<Vec<Heartbeat>> {
        self.0.heartbeats_since(monitor_id, since).await
    }

    async fn delete_heartbeats_before(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        self.0.delete_heartbeats_before(cutoff).await
    }

    async fn get_setting(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.0.get_setting(key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.0.set_setting(key, value).await
    }

    async fn save_notification(&self, notification: &NotificationConfig) -> anyhow::Result<i64> {
        self.0.save_notification(notification).await
    }

    async fn link_notification(&self, monitor_id: i64, notification_id: i64) -> anyhow::Result<()> {
        self.0.link_notification(monitor_id, notification_id).await
    }

    async fn notifications_for_monitor(&self, monitor_id: i64) -> anyhow::Result<Vec<NotificationConfig>> {
        self.0.notifications_for_monitor(monitor_id).await
    }
}

pub struct Harness {
    pub database: Arc<MemoryDatabase>,
    pub context: Arc<EngineContext>,
    pub recorder: Arc<RecordingProvider>,
}

impl Harness {
    /// Engine over an in-memory store, with `checker` registered as `stub`
    /// next to the built-in checkers and a recording notification provider.
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        let database = Arc::new(MemoryDatabase::new());
        let store: Arc<dyn Database> = database.clone();

        let mut executor = MonitoringExecutor::with_defaults(Arc::clone(&store)).unwrap();
        executor.register(STUB_TYPE, checker);

        let recorder = Arc::new(RecordingProvider::default());
        let mut dispatcher = NotificationDispatcher::new(Arc::clone(&store));
        dispatcher.register("recording", recorder.clone());

        let context = Arc::new(EngineContext {
            database: store,
            executor: Arc::new(executor),
            dispatcher: Arc::new(dispatcher),
            bus: EventBus::default(),
            demo_mode: false,
        });

        Self { database, context, recorder }
    }

    /// Same engine, runners talking to `store` instead
    pub fn context_with_store(&self, store: Arc<dyn Database>) -> Arc<EngineContext> {
        Arc::new(EngineContext {
            database: store,
            executor: Arc::clone(&self.context.executor),
            dispatcher: Arc::clone(&self.context.dispatcher),
            bus: self.context.bus.clone(),
            demo_mode: false,
        })
    }

    /// Saves `monitor` and links it to the recording provider
    pub async fn add(&self, mut monitor: Monitor) -> Monitor {
        monitor.id = self.database.save_monitor(&monitor).await.unwrap();
        let notification = NotificationConfig::new("recorder", "recording", json!({}));
        let notification_id = self.database.save_notification(&notification).await.unwrap();
        self.database.link_notification(monitor.id, notification_id).await.unwrap();
        monitor
    }

    pub async fn beats(&self, monitor_id: i64) -> Vec<Heartbeat> {
        self.database
            .heartbeats_since(monitor_id, DateTime::UNIX_EPOCH)
            .await
            .unwrap()
    }

    pub async fn notifications(&self) -> Vec<String> {
        self.recorder.sent.lock().await.clone()
    }
}

pub fn stub_monitor(name: &str) -> Monitor {
    let mut monitor = Monitor::new(name, STUB_TYPE);
    monitor.interval = 60;
    monitor.retry_interval = 20;
    monitor
}
