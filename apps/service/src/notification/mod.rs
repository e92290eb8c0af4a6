//! Notification fan-out: renders the alert text and hands it, together with
//! the monitor and heartbeat JSON, to every provider linked to the monitor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::database::{
    Database,
    models::{Monitor, NotificationConfig},
};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

pub mod webhook;

pub use webhook::WebhookProvider;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for provider: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// One delivery channel type (webhook, chat, mail, ...).
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Delivers `message`. `monitor` and `heartbeat` are absent for test sends.
    async fn send(
        &self,
        config: &Value,
        message: &str,
        monitor: Option<&Value>,
        heartbeat: Option<&Value>,
    ) -> Result<(), SenderError>;
}

/// Routes alerts to the providers configured for a monitor
pub struct NotificationDispatcher {
    database: Arc<dyn Database>,
    providers: HashMap<String, Arc<dyn NotificationProvider>>,
}

impl NotificationDispatcher {
    /// Dispatcher without any provider
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database, providers: HashMap::new() }
    }

    /// Dispatcher with the built-in providers registered
    pub fn with_defaults(database: Arc<dyn Database>) -> Self {
        let mut dispatcher = Self::new(database);
        dispatcher.register("webhook", Arc::new(WebhookProvider::new()));
        dispatcher
    }

    pub fn register(&mut self, provider: impl Into<String>, implementation: Arc<dyn NotificationProvider>) {
        self.providers.insert(provider.into(), implementation);
    }

    /// `[name] [✅ Up] msg` style alert text
    pub fn render_message(monitor: &Monitor, heartbeat: &Heartbeat) -> String {
        let badge = match heartbeat.status {
            MonitorStatus::Up => "✅ Up",
            MonitorStatus::Down => "🔴 Down",
            MonitorStatus::Pending => "🟡 Pending",
            MonitorStatus::Maintenance => "🔵 Maintenance",
        };
        format!("[{}] [{}] {}", monitor.label(), badge, heartbeat.msg)
    }

    /// Sends through the provider named by `notification`
    pub async fn send(
        &self,
        notification: &NotificationConfig,
        message: &str,
        monitor: Option<&Value>,
        heartbeat: Option<&Value>,
    ) -> Result<(), SenderError> {
        let provider = self.providers.get(&notification.provider).ok_or_else(|| {
            SenderError::InvalidConfiguration(format!(
                "Unsupported notification provider: {}",
                notification.provider
            ))
        })?;

        provider.send(&notification.config, message, monitor, heartbeat).await
    }

    /// Alerts every active provider linked to `monitor`, concurrently.
    ///
    /// Failures are logged per provider and never abort the other deliveries.
    /// Returns the number of successful deliveries.
    pub async fn notify(&self, monitor: &Monitor, heartbeat: &Heartbeat) -> usize {
        let notifications = match self.database.notifications_for_monitor(monitor.id).await {
            Ok(notifications) => notifications,
            Err(error) => {
                warn!(monitor_id = monitor.id, error = %format!("{error:#}"), "Unable to load notification targets");
                return 0;
            }
        };

        let active: Vec<_> = notifications.into_iter().filter(|notification| notification.active).collect();
        if active.is_empty() {
            return 0;
        }

        let message = Self::render_message(monitor, heartbeat);
        let monitor_json = monitor.to_json();
        let heartbeat_json = heartbeat.to_json();

        let deliveries = active.iter().map(|notification| {
            let message = message.as_str();
            let monitor_json = &monitor_json;
            let heartbeat_json = &heartbeat_json;
            async move {
                let result = self.send(notification, message, Some(monitor_json), Some(heartbeat_json)).await;
                (notification, result)
            }
        });

        let mut delivered = 0;
        for (notification, result) in join_all(deliveries).await {
            match result {
                Ok(()) => {
                    delivered += 1;
                    debug!(monitor_id = monitor.id, notification = %notification.name, "Notification sent");
                }
                Err(error) => warn!(
                    monitor_id = monitor.id,
                    notification = %notification.name,
                    provider = %notification.provider,
                    %error,
                    "Cannot send notification"
                ),
            }
        }
        delivered
    }
}
