use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::runner::{EngineContext, MonitorRunner};
use super::validation::{ValidationError, validate_monitor};
use crate::database::models::Monitor;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Monitor {0} not found")]
    NotFound(i64),
    #[error("Monitor {0} is not active")]
    Inactive(i64),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Handle on a spawned monitor loop
struct RunnerHandle {
    stopped: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RunnerHandle {
    /// Cancels the pending sleep. A tick already in flight finishes, then the
    /// loop sees the flag and exits without re-arming.
    fn stop(mut self) -> JoinHandle<()> {
        self.stopped.store(true, Ordering::Release);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task
    }

    /// Stops the loop and waits until an in-flight tick has persisted.
    /// Bounded by the check timeout since the sleep is cancelled.
    async fn stop_and_wait(self, monitor_id: i64) {
        if let Err(error) = self.stop().await {
            warn!(monitor_id, %error, "Monitor loop ended abnormally");
        }
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

type Slot = Arc<Mutex<Option<RunnerHandle>>>;

/// Monitoring scheduler - owns one loop per running monitor.
///
/// Lifecycle calls for the same monitor id are serialized through a per-id
/// async mutex; different ids never contend.
pub struct MonitoringScheduler {
    context: Arc<EngineContext>,
    runners: DashMap<i64, Slot>,
}

impl MonitoringScheduler {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context, runners: DashMap::new() }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    fn slot(&self, monitor_id: i64) -> Slot {
        Arc::clone(self.runners.entry(monitor_id).or_default().value())
    }

    /// Loads, validates and (re)starts a monitor. Any loop already running
    /// for the id is stopped first, so there is never more than one timer.
    pub async fn start(&self, monitor_id: i64) -> Result<(), SchedulerError> {
        let monitor = self
            .context
            .database
            .get_monitor(monitor_id)
            .await?
            .ok_or(SchedulerError::NotFound(monitor_id))?;

        self.launch(monitor).await
    }

    /// Same as `start`
    pub async fn restart(&self, monitor_id: i64) -> Result<(), SchedulerError> {
        self.start(monitor_id).await
    }

    async fn launch(&self, monitor: Monitor) -> Result<(), SchedulerError> {
        if !monitor.active {
            return Err(SchedulerError::Inactive(monitor.id));
        }
        validate_monitor(&monitor, &self.context.executor)?;

        let monitor_id = monitor.id;
        let slot = self.slot(monitor_id);
        let mut current = slot.lock().await;

        // The old loop must be gone before the new one probes
        if let Some(previous) = current.take() {
            debug!(monitor_id, "Replacing running monitor loop");
            previous.stop_and_wait(monitor_id).await;
        }

        info!(monitor_id, name = %monitor.name, monitor_type = %monitor.monitor_type, interval = monitor.interval, "Starting monitor");
        *current = Some(self.spawn(monitor));
        Ok(())
    }

    fn spawn(&self, monitor: Monitor) -> RunnerHandle {
        let stopped = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let runner = MonitorRunner::new(monitor, Arc::clone(&self.context));
        let task = tokio::spawn(run_loop(runner, Arc::clone(&stopped), shutdown_rx));

        RunnerHandle { stopped, shutdown_tx: Some(shutdown_tx), task }
    }

    /// Stops a monitor's loop and waits for a check in flight to finish.
    /// Returns false when it was not running.
    pub async fn stop(&self, monitor_id: i64) -> bool {
        let Some(slot) = self.runners.get(&monitor_id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };

        let mut current = slot.lock().await;
        match current.take() {
            Some(handle) => {
                info!(monitor_id, "Stopping monitor");
                handle.stop_and_wait(monitor_id).await;
                true
            }
            None => false,
        }
    }

    /// Starts every active monitor in the store; returns how many started.
    /// A monitor that fails validation is logged and skipped.
    pub async fn start_all_active(&self) -> Result<usize, SchedulerError> {
        let monitors = self.context.database.get_active_monitors().await?;
        let total = monitors.len();
        let mut started = 0;

        for monitor in monitors {
            let monitor_id = monitor.id;
            match self.launch(monitor).await {
                Ok(()) => started += 1,
                Err(error) => warn!(monitor_id, %error, "Unable to start monitor"),
            }
        }

        info!(started, total, "Active monitors started");
        Ok(started)
    }

    pub async fn stop_all(&self) {
        let ids: Vec<i64> = self.runners.iter().map(|entry| *entry.key()).collect();
        let mut stopped = 0;
        for monitor_id in ids {
            if self.stop(monitor_id).await {
                stopped += 1;
            }
        }
        info!(stopped, "All monitors stopped");
    }

    pub async fn is_running(&self, monitor_id: i64) -> bool {
        let Some(slot) = self.runners.get(&monitor_id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        slot.lock().await.as_ref().is_some_and(RunnerHandle::is_alive)
    }

    pub async fn running_count(&self) -> usize {
        let slots: Vec<Slot> = self.runners.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.as_ref().is_some_and(RunnerHandle::is_alive) {
                count += 1;
            }
        }
        count
    }
}

/// Sleep, tick, re-arm until stopped.
async fn run_loop(mut runner: MonitorRunner, stopped: Arc<AtomicBool>, mut shutdown_rx: oneshot::Receiver<()>) {
    let monitor_id = runner.monitor().id;
    let mut delay = runner.initial_delay();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            _ = sleep(delay) => {}
        }

        if stopped.load(Ordering::Acquire) {
            break;
        }

        delay = runner.tick().await;

        if stopped.load(Ordering::Acquire) {
            break;
        }
        debug!(monitor_id, next_in = ?delay, "Monitor re-armed");
    }

    debug!(monitor_id, "Monitor loop exited");
}
