use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use super::executor::MonitoringExecutor;
use super::push::{self, PushWindow};
use super::transition::{self, CheckOutcome, FLIP_MESSAGE};
use super::types::{Heartbeat, MonitorStatus};
use super::validation::MIN_INTERVAL_SECONDS;
use crate::bus::EventBus;
use crate::database::{Database, models::Monitor};
use crate::notification::NotificationDispatcher;

/// Shared handles every runner works with
pub struct EngineContext {
    pub database: Arc<dyn Database>,
    pub executor: Arc<MonitoringExecutor>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub bus: EventBus,
    /// Floors every delay at the minimum interval
    pub demo_mode: bool,
}

impl EngineContext {
    pub(crate) fn floor_delay(&self, seconds: u64) -> Duration {
        let seconds = if self.demo_mode {
            seconds.max(MIN_INTERVAL_SECONDS)
        } else {
            seconds.max(1)
        };
        Duration::from_secs(seconds)
    }
}

/// Per-monitor state machine, driven one tick at a time by the scheduler loop
pub struct MonitorRunner {
    monitor: Monitor,
    context: Arc<EngineContext>,
    previous: Option<Heartbeat>,
    retries: u32,
}

impl MonitorRunner {
    /// Fresh runner: nothing cached and the retry counter at zero
    pub fn new(monitor: Monitor, context: Arc<EngineContext>) -> Self {
        Self { monitor, context, previous: None, retries: 0 }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn previous(&self) -> Option<&Heartbeat> {
        self.previous.as_ref()
    }

    /// Push monitors first wait a full interval for a push to arrive
    pub fn initial_delay(&self) -> Duration {
        if self.monitor.is_push() {
            self.context.floor_delay(self.monitor.interval)
        } else {
            Duration::ZERO
        }
    }

    /// Runs one beat and returns the delay until the next one.
    ///
    /// Never fails: errors and panics are logged and the base interval is
    /// returned so the monitor keeps being scheduled.
    pub async fn tick(&mut self) -> Duration {
        let monitor_id = self.monitor.id;
        let fallback = self.context.floor_delay(self.monitor.interval);

        match AssertUnwindSafe(self.beat()).catch_unwind().await {
            Ok(Ok(delay)) => delay,
            Ok(Err(error)) => {
                error!(monitor_id, error = %format!("{error:#}"), "Heartbeat failed, retrying on the base interval");
                fallback
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|reason| reason.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                error!(monitor_id, %reason, "Heartbeat panicked, retrying on the base interval");
                fallback
            }
        }
    }

    async fn beat(&mut self) -> Result<Duration> {
        let context = Arc::clone(&self.context);
        let monitor_id = self.monitor.id;

        if self.previous.is_none() || self.monitor.is_push() {
            self.previous = context
                .database
                .find_previous_heartbeat(monitor_id)
                .await
                .context("failed to load previous heartbeat")?;
        }

        let is_first_beat = self.previous.is_none();
        let now = Utc::now();
        let mut heartbeat = Heartbeat::draft(&self.monitor, now, self.previous.as_ref());

        let outcome = if self.monitor.is_push() {
            match push::window_state(&self.monitor, self.previous.as_ref(), now) {
                PushWindow::Satisfied { recheck_in } => {
                    debug!(monitor_id, "Push received within the window");
                    self.retries = 0;
                    return Ok(recheck_in);
                }
                PushWindow::Missed { since_last } => {
                    heartbeat.duration = since_last;
                    heartbeat.msg = push::NO_HEARTBEAT_MESSAGE.into();
                    CheckOutcome::Failed
                }
            }
        } else {
            match context.executor.execute(&self.monitor, &mut heartbeat).await {
                Ok(()) => CheckOutcome::Completed(heartbeat.status),
                Err(error) => {
                    heartbeat.msg = error.to_string();
                    CheckOutcome::Failed
                }
            }
        };

        let decision = transition::apply_retry_policy(outcome, &self.monitor, self.retries);
        if decision.flipped {
            heartbeat.msg = FLIP_MESSAGE.into();
        }
        heartbeat.status = decision.status;
        heartbeat.retries = decision.retries;
        self.retries = decision.retries;

        let previous_status = self.previous.as_ref().map(|previous| previous.status);
        heartbeat.important = transition::is_important_beat(is_first_beat, previous_status, heartbeat.status);

        let resend = self.track_resend(&mut heartbeat);

        match heartbeat.status {
            MonitorStatus::Up => info!(
                monitor_id,
                name = %self.monitor.name,
                ping = ?heartbeat.ping,
                interval = decision.interval,
                "Successful response"
            ),
            _ => warn!(
                monitor_id,
                name = %self.monitor.name,
                status = %heartbeat.status,
                retries = heartbeat.retries,
                msg = %heartbeat.msg,
                "Failing"
            ),
        }

        let id = context
            .database
            .append_heartbeat(&heartbeat)
            .await
            .context("failed to persist heartbeat")?;
        heartbeat.id = Some(id);

        self.previous = Some(heartbeat.clone());

        context.bus.publish_heartbeat(&heartbeat);
        context.bus.refresh_stats(Arc::clone(&context.database), monitor_id);

        if heartbeat.important || resend {
            let delivered = context.dispatcher.notify(&self.monitor, &heartbeat).await;
            debug!(monitor_id, delivered, resend, "Dispatched notifications");
        }

        Ok(self.context.floor_delay(decision.interval))
    }

    /// Counts unimportant DOWN beats and reports whether this one should
    /// re-send the alert.
    fn track_resend(&self, heartbeat: &mut Heartbeat) -> bool {
        let resend_interval = self.monitor.resend_interval;
        if heartbeat.important || heartbeat.status != MonitorStatus::Down || resend_interval == 0 {
            heartbeat.down_count = 0;
            return false;
        }

        let count = heartbeat.down_count + 1;
        if count >= resend_interval {
            heartbeat.down_count = 0;
            true
        } else {
            heartbeat.down_count = count;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::testing::{Harness, RejectingAppends, ScriptedChecker, Step, stub_monitor};
    use MonitorStatus::*;

    #[tokio::test]
    async fn retries_then_down_with_importance() {
        let checker = ScriptedChecker::new([Step::Status(Up), Step::Fail("ECONNREFUSED")]);
        let harness = Harness::new(checker);
        let mut monitor = stub_monitor("api");
        monitor.max_retries = 3;
        let monitor = harness.add(monitor).await;

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        let mut delays = Vec::new();
        for _ in 0..6 {
            delays.push(runner.tick().await.as_secs());
        }

        let beats = harness.beats(monitor.id).await;
        let summary: Vec<_> = beats.iter().map(|beat| (beat.status, beat.retries, beat.important)).collect();
        assert_eq!(
            summary,
            vec![
                (Up, 0, true),
                (Pending, 1, false),
                (Pending, 2, false),
                (Pending, 3, false),
                (Down, 3, true),
                (Down, 3, false),
            ]
        );
        assert_eq!(delays, vec![60, 20, 20, 20, 60, 60]);
        assert_eq!(beats[1].msg, "ECONNREFUSED");

        let sent = harness.notifications().await;
        assert_eq!(sent, vec!["[api] [✅ Up] scripted", "[api] [🔴 Down] ECONNREFUSED"]);
    }

    #[tokio::test]
    async fn first_beat_is_important_whatever_the_status() {
        for step in [Step::Status(Up), Step::Status(Pending), Step::Fail("boom")] {
            let harness = Harness::new(ScriptedChecker::new([step]));
            let monitor = harness.add(stub_monitor("api")).await;
            let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));

            runner.tick().await;
            let beats = harness.beats(monitor.id).await;
            assert_eq!(beats.len(), 1);
            assert!(beats[0].important);
            assert_eq!(beats[0].duration, 0);
        }
    }

    #[tokio::test]
    async fn closed_port_goes_down_once() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let harness = Harness::new(ScriptedChecker::new([]));
        let mut monitor = Monitor::new("local port", "port");
        monitor.hostname = Some("127.0.0.1".into());
        monitor.port = Some(port);
        monitor.max_retries = 0;
        let monitor = harness.add(monitor).await;

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        runner.tick().await;
        runner.tick().await;

        let beats = harness.beats(monitor.id).await;
        assert_eq!(beats.len(), 2);
        assert_eq!((beats[0].status, beats[0].important), (Down, true));
        assert_eq!((beats[1].status, beats[1].important), (Down, false));
        assert!(beats[0].msg.starts_with("Connection failed"));
        assert_eq!(harness.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn previous_beat_is_loaded_from_the_store_on_start() {
        let harness = Harness::new(ScriptedChecker::new([Step::Status(Up)]));
        let monitor = harness.add(stub_monitor("api")).await;

        MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context)).tick().await;
        // A restarted runner compares against the stored beat
        MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context)).tick().await;

        let beats = harness.beats(monitor.id).await;
        assert_eq!(beats.len(), 2);
        assert!(!beats[1].important);
    }

    #[tokio::test]
    async fn down_alerts_are_resent() {
        let harness = Harness::new(ScriptedChecker::new([Step::Fail("down")]));
        let mut monitor = stub_monitor("api");
        monitor.resend_interval = 2;
        let monitor = harness.add(monitor).await;

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        for _ in 0..5 {
            runner.tick().await;
        }

        let counts: Vec<u32> = harness.beats(monitor.id).await.iter().map(|beat| beat.down_count).collect();
        assert_eq!(counts, vec![0, 1, 0, 1, 0]);
        // first beat, then every second unimportant DOWN beat
        assert_eq!(harness.notifications().await.len(), 3);
    }

    #[tokio::test]
    async fn upside_down_success_is_flipped() {
        let harness = Harness::new(ScriptedChecker::new([Step::Status(Up), Step::Fail("refused")]));
        let mut monitor = stub_monitor("should be closed");
        monitor.upside_down = true;
        let monitor = harness.add(monitor).await;

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        runner.tick().await;
        runner.tick().await;

        let beats = harness.beats(monitor.id).await;
        assert_eq!((beats[0].status, beats[0].msg.as_str()), (Down, FLIP_MESSAGE));
        assert_eq!((beats[1].status, beats[1].important), (Up, true));
    }

    #[tokio::test]
    async fn panicking_check_keeps_the_schedule() {
        let checker = ScriptedChecker::new([Step::Panic, Step::Status(Up)]);
        let harness = Harness::new(checker.clone());
        let monitor = harness.add(stub_monitor("api")).await;

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        assert_eq!(runner.tick().await, Duration::from_secs(60));
        assert!(harness.beats(monitor.id).await.is_empty());

        runner.tick().await;
        assert_eq!(checker.calls(), 2);
        assert_eq!(harness.beats(monitor.id).await.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_is_not_a_success() {
        let harness = Harness::new(ScriptedChecker::new([Step::Fail("refused")]));
        let mut monitor = stub_monitor("api");
        monitor.max_retries = 2;
        let monitor = harness.add(monitor).await;

        let context = harness.context_with_store(Arc::new(RejectingAppends(harness.database.clone())));
        let mut runner = MonitorRunner::new(monitor.clone(), context);

        // A stored PENDING beat would re-arm on the 20s retry interval
        assert_eq!(runner.tick().await, Duration::from_secs(60));
        assert!(runner.previous().is_none());
        assert!(harness.beats(monitor.id).await.is_empty());
        assert!(harness.notifications().await.is_empty());
    }

    #[tokio::test]
    async fn push_monitor_without_pushes_records_a_miss() {
        let harness = Harness::new(ScriptedChecker::new([]));
        let mut monitor = Monitor::new("cron", "push");
        monitor.interval = 60;
        monitor.push_token = Some("abc".into());
        let monitor = harness.add(monitor).await;

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        assert_eq!(runner.initial_delay(), Duration::from_secs(60));
        runner.tick().await;

        let beats = harness.beats(monitor.id).await;
        assert_eq!(beats.len(), 1);
        assert_eq!((beats[0].status, beats[0].important), (Down, true));
        assert_eq!(beats[0].msg, push::NO_HEARTBEAT_MESSAGE);
        assert_eq!(beats[0].duration, 60);
    }

    #[tokio::test]
    async fn push_monitor_with_fresh_push_writes_nothing() {
        let harness = Harness::new(ScriptedChecker::new([]));
        let mut monitor = Monitor::new("cron", "push");
        monitor.interval = 60;
        let monitor = harness.add(monitor).await;

        let mut pushed = Heartbeat::draft(&monitor, Utc::now(), None);
        pushed.status = Up;
        harness.database.append_heartbeat(&pushed).await.unwrap();

        let mut runner = MonitorRunner::new(monitor.clone(), Arc::clone(&harness.context));
        let delay = runner.tick().await;

        assert!(delay <= Duration::from_secs(61) && delay >= Duration::from_secs(59));
        assert_eq!(harness.beats(monitor.id).await.len(), 1);
    }

    #[tokio::test]
    async fn demo_mode_floors_the_delay() {
        let harness = Harness::new(ScriptedChecker::new([]));
        let context = EngineContext {
            database: Arc::clone(&harness.context.database),
            executor: Arc::clone(&harness.context.executor),
            dispatcher: Arc::clone(&harness.context.dispatcher),
            bus: harness.context.bus.clone(),
            demo_mode: true,
        };
        assert_eq!(context.floor_delay(5), Duration::from_secs(MIN_INTERVAL_SECONDS));
        assert_eq!(harness.context.floor_delay(0), Duration::from_secs(1));
    }
}
