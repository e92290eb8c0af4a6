/// Orchestrator module - coordinates all components
///
/// The orchestrator wires the store, the check registry, the notification
/// dispatcher and the event bus into one engine context, then:
/// - Starts a loop for every active monitor
/// - Runs the retention cleanup in the background
/// - Stops every loop on shutdown
pub mod retention;

pub use retention::{RetentionCleanup, RetentionPolicy};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, MonitorEvent};
use crate::config::{Config, RetentionConfig};
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::monitoring::{EngineContext, MonitoringExecutor, MonitoringScheduler, PushReceiver};
use crate::notification::NotificationDispatcher;
use crate::pool::LibsqlPool;

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            default_keep_days: config.default_keep_days,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_hours.max(1) * 3600),
        }
    }
}

/// Main orchestrator for the Vigil service
pub struct Orchestrator {
    database: Arc<dyn Database>,
    scheduler: Arc<MonitoringScheduler>,
    push_receiver: Arc<PushReceiver>,
    bus: EventBus,
    retention_policy: RetentionPolicy,
    task_handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Create and run an orchestrator until Ctrl-C
    pub async fn start(config: Config, pool: LibsqlPool) -> Result<()> {
        let mut orchestrator = Self::new(&config, pool).await?;
        orchestrator.run(shutdown_signal()).await
    }

    /// Migrate the pooled database and build the engine on top of it
    pub async fn new(config: &Config, pool: LibsqlPool) -> Result<Self> {
        {
            let conn = pool.get().await?;
            info!("Initializing database schema...");
            initialize_database(&conn).await?;
        }

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));
        Self::with_database(config, database)
    }

    /// Build the engine on an already prepared store
    pub fn with_database(config: &Config, database: Arc<dyn Database>) -> Result<Self> {
        let executor = Arc::new(MonitoringExecutor::with_defaults(Arc::clone(&database))?);
        let dispatcher = Arc::new(NotificationDispatcher::with_defaults(Arc::clone(&database)));
        let bus = EventBus::new(config.monitoring.event_capacity);

        if config.monitoring.demo_mode {
            info!("Demo mode: intervals are floored at 20 seconds");
        }

        let context = Arc::new(EngineContext {
            database: Arc::clone(&database),
            executor,
            dispatcher: Arc::clone(&dispatcher),
            bus: bus.clone(),
            demo_mode: config.monitoring.demo_mode,
        });

        Ok(Self {
            scheduler: Arc::new(MonitoringScheduler::new(context)),
            push_receiver: Arc::new(PushReceiver::new(Arc::clone(&database), dispatcher, bus.clone())),
            database,
            bus,
            retention_policy: RetentionPolicy::from(&config.retention),
            task_handles: Vec::new(),
        })
    }

    pub fn scheduler(&self) -> Arc<MonitoringScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn push_receiver(&self) -> Arc<PushReceiver> {
        Arc::clone(&self.push_receiver)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Run until `shutdown` resolves
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Starting Vigil orchestrator...");

        info!(
            default_keep_days = self.retention_policy.default_keep_days,
            every = ?self.retention_policy.cleanup_interval,
            "Starting retention cleanup background task..."
        );
        let retention = RetentionCleanup::new(Arc::clone(&self.database), self.retention_policy.clone());
        self.task_handles.push(retention.start_periodic_cleanup());
        self.task_handles.push(self.spawn_event_log());

        let started = self.scheduler.start_all_active().await?;
        info!(started, "Orchestrator started successfully");

        shutdown.await;

        info!("Shutdown requested, stopping monitors...");
        self.scheduler.stop_all().await;
        for handle in self.task_handles.drain(..) {
            handle.abort();
        }
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Traces every bus event at debug level
    fn spawn_event_log(&self) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(MonitorEvent::Heartbeat(beat)) => {
                        debug!(monitor_id = beat.monitor_id, status = %beat.status, important = beat.important, "heartbeat event")
                    }
                    Ok(MonitorEvent::Stats(stats)) => debug!(
                        monitor_id = stats.monitor_id,
                        uptime_24h = stats.uptime_24h,
                        avg_ping_24h = ?stats.avg_ping_24h,
                        "stats event"
                    ),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event log fell behind")
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "Unable to listen for Ctrl-C, shutting down");
    }
}
