use std::time::Instant;

use tokio::net::TcpStream;

use crate::database::models::Monitor;
use crate::monitoring::checker::{CheckError, Checker, required};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

/// TCP port checker
pub struct TcpChecker;

#[async_trait::async_trait]
impl Checker for TcpChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let hostname = required(monitor.hostname.as_deref(), "hostname")?;
        let port = monitor
            .port
            .ok_or_else(|| CheckError::Config("Monitor has no port configured".into()))?;

        let start = Instant::now();
        TcpStream::connect((hostname, port))
            .await
            .map_err(|error| CheckError::Network(format!("Connection failed: {error}")))?;

        heartbeat.ping = Some(start.elapsed().as_millis() as u64);
        heartbeat.status = MonitorStatus::Up;
        Ok(())
    }
}
