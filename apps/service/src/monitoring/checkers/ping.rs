use std::net::IpAddr;
use std::time::Duration;

use rand::random;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tokio::net::lookup_host;

use crate::database::models::Monitor;
use crate::monitoring::checker::{CheckError, Checker, required};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

const PAYLOAD: [u8; 56] = [0; 56];

/// ICMP echo checker. Opening the socket needs raw-socket capability or an
/// unprivileged ping group.
pub struct IcmpChecker;

async fn resolve(hostname: &str) -> Result<IpAddr, CheckError> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Ok(ip);
    }

    lookup_host((hostname, 0))
        .await
        .map_err(|error| CheckError::Network(format!("Failed to resolve {hostname}: {error}")))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| CheckError::Network(format!("No address found for {hostname}")))
}

/// One echo request, returns the round trip time.
pub async fn icmp_round_trip(hostname: &str, limit: Duration) -> Result<Duration, CheckError> {
    let target = resolve(hostname).await?;

    let config = match target {
        IpAddr::V4(_) => Config::default(),
        IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
    };
    let client = Client::new(&config)
        .map_err(|error| CheckError::Config(format!("Unable to open ICMP socket: {error}")))?;

    let mut pinger = client.pinger(target, PingIdentifier(random())).await;
    pinger.timeout(limit);

    let (_reply, round_trip) = pinger
        .ping(PingSequence(0), &PAYLOAD)
        .await
        .map_err(|error| CheckError::Network(error.to_string()))?;

    Ok(round_trip)
}

#[async_trait::async_trait]
impl Checker for IcmpChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let hostname = required(monitor.hostname.as_deref(), "hostname")?;
        let round_trip = icmp_round_trip(hostname, monitor.timeout_duration()).await?;

        heartbeat.ping = Some(round_trip.as_millis() as u64);
        heartbeat.status = MonitorStatus::Up;
        Ok(())
    }
}
