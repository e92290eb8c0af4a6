//! Automatic pruning of old heartbeats.
//!
//! The number of days to keep is read from the `keepDataPeriodDays` setting on
//! every run, so it can change without a restart. A value below 1 keeps
//! everything. Cleanup runs periodically (every hour by default) as a
//! background task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::database::Database;

/// Setting holding the retention period in days
pub const KEEP_DATA_SETTING: &str = "keepDataPeriodDays";

/// Retention policy used when the setting is absent
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep heartbeats when the store has no setting
    pub default_keep_days: i64,
    /// How often the cleanup runs
    pub cleanup_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { default_keep_days: 180, cleanup_interval: Duration::from_secs(3600) }
    }
}

/// Cleanup manager for expired heartbeats
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Current retention period. Unparseable values fall back to the policy.
    pub async fn keep_days(&self) -> Result<i64> {
        let Some(raw) = self.database.get_setting(KEEP_DATA_SETTING).await? else {
            return Ok(self.policy.default_keep_days);
        };

        match raw.trim().parse::<i64>() {
            Ok(days) => Ok(days),
            Err(_) => {
                warn!(value = %raw, "Invalid {KEEP_DATA_SETTING}, using the default");
                Ok(self.policy.default_keep_days)
            }
        }
    }

    /// Deletes heartbeats older than the retention period, returns how many
    /// were removed.
    pub async fn cleanup_expired_heartbeats(&self, now: DateTime<Utc>) -> Result<u64> {
        let days = self.keep_days().await?;
        if days < 1 {
            debug!(days, "Retention disabled, keeping all heartbeats");
            return Ok(0);
        }

        let Some(cutoff) = TimeDelta::try_days(days).and_then(|keep| now.checked_sub_signed(keep)) else {
            warn!(days, "Retention period reaches before any representable time, keeping all heartbeats");
            return Ok(0);
        };
        let deleted = self.database.delete_heartbeats_before(cutoff).await?;
        info!(deleted, days, %cutoff, "Retention cleanup completed");
        Ok(deleted)
    }

    /// Start background cleanup task
    pub fn start_periodic_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let cleanup = RetentionCleanup::new(Arc::clone(&self.database), self.policy.clone());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup.policy.cleanup_interval);

            loop {
                interval.tick().await;

                if let Err(e) = cleanup.cleanup_expired_heartbeats(Utc::now()).await {
                    warn!(error = %format!("{e:#}"), "Periodic heartbeat cleanup failed");
                }
            }
        })
    }
}
