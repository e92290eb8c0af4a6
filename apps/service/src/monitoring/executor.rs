use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::time::timeout;

use super::checker::{CheckError, Checker};
use super::checkers::{
    dns::DnsChecker, group::GroupChecker, http::HttpChecker, ping::IcmpChecker, smtp::SmtpChecker,
    steam::SteamChecker, tcp::TcpChecker,
};
use super::types::Heartbeat;
use crate::database::{Database, models::Monitor};

/// Monitoring executor - runs one check with the monitor's timeout applied
#[derive(Default)]
pub struct MonitoringExecutor {
    checkers: HashMap<String, Arc<dyn Checker>>,
}

impl MonitoringExecutor {
    /// Executor with no checkers registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor with every built-in monitor type registered
    pub fn with_defaults(database: Arc<dyn Database>) -> Result<Self> {
        let mut executor = Self::new();

        let http: Arc<dyn Checker> = Arc::new(HttpChecker::new());
        executor.register("http", Arc::clone(&http));
        executor.register("keyword", Arc::clone(&http));
        executor.register("json-query", http);
        executor.register("port", Arc::new(TcpChecker));
        executor.register("ping", Arc::new(IcmpChecker));
        executor.register("dns", Arc::new(DnsChecker));
        executor.register("smtp", Arc::new(SmtpChecker));
        executor.register("group", Arc::new(GroupChecker::new(Arc::clone(&database))));
        executor.register("steam", Arc::new(SteamChecker::new(database)?));

        Ok(executor)
    }

    /// Add or replace the checker for a monitor type
    pub fn register(&mut self, monitor_type: impl Into<String>, checker: Arc<dyn Checker>) {
        self.checkers.insert(monitor_type.into(), checker);
    }

    pub fn supports(&self, monitor_type: &str) -> bool {
        self.checkers.contains_key(monitor_type)
    }

    /// Execute a monitoring check
    pub async fn execute(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let checker = self.checkers.get(&monitor.monitor_type).ok_or_else(|| {
            CheckError::Config(format!("Unsupported monitor type: {}", monitor.monitor_type))
        })?;

        let limit = monitor.timeout_duration();
        match timeout(limit, checker.check(monitor, heartbeat)).await {
            Ok(result) => result,
            Err(_) => Err(CheckError::Timeout(limit)),
        }
    }
}
