use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::http::check_status_code;
use super::ping::icmp_round_trip;
use crate::database::{Database, models::Monitor};
use crate::monitoring::checker::{CheckError, Checker, required};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

/// Settings key holding the Steam Web API key
pub const STEAM_API_KEY_SETTING: &str = "steamAPIKey";

const STEAM_SERVER_LIST_URL: &str = "https://api.steampowered.com/IGameServersService/GetServerList/v1/";

#[derive(Debug, Deserialize)]
struct ServerListEnvelope {
    response: ServerList,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<SteamServer>,
}

#[derive(Debug, Deserialize)]
struct SteamServer {
    #[serde(default)]
    name: String,
}

/// Game server checker backed by the Steam server list API
pub struct SteamChecker {
    database: Arc<dyn Database>,
    client: Client,
    api_url: String,
}

impl SteamChecker {
    pub fn new(database: Arc<dyn Database>) -> Result<Self> {
        Self::with_api_url(database, STEAM_SERVER_LIST_URL)
    }

    pub fn with_api_url(database: Arc<dyn Database>, api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { database, client, api_url: api_url.into() })
    }
}

#[async_trait::async_trait]
impl Checker for SteamChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let hostname = required(monitor.hostname.as_deref(), "hostname")?;
        let port = monitor
            .port
            .ok_or_else(|| CheckError::Config("Monitor has no port configured".into()))?;

        let api_key = self
            .database
            .get_setting(STEAM_API_KEY_SETTING)
            .await
            .map_err(|error| CheckError::Internal(format!("Unable to read settings: {error:#}")))?
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| CheckError::Config("Steam API Key not found".into()))?;

        let filter = format!("addr\\{hostname}:{port}");
        let response = self
            .client
            .get(&self.api_url)
            .timeout(monitor.timeout_duration())
            .query(&[("filter", filter.as_str()), ("key", api_key.as_str())])
            .send()
            .await?;

        let status = response.status().as_u16();
        if !check_status_code(status, &monitor.accepted_status_codes) {
            return Err(CheckError::Assertion(format!("Request failed with status code {status}")));
        }

        let envelope: ServerListEnvelope = response.json().await?;
        let server = envelope
            .response
            .servers
            .into_iter()
            .next()
            .ok_or_else(|| CheckError::Assertion("Server not found on Steam".into()))?;

        // Latency is best effort; the server being listed is what counts
        match icmp_round_trip(hostname, monitor.timeout_duration()).await {
            Ok(round_trip) => heartbeat.ping = Some(round_trip.as_millis() as u64),
            Err(error) => debug!(monitor_id = monitor.id, %error, "Steam server ping failed"),
        }

        heartbeat.status = MonitorStatus::Up;
        heartbeat.msg = server.name;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;

    fn steam_monitor() -> Monitor {
        let mut monitor = Monitor::new("cs", "steam");
        monitor.hostname = Some("192.0.2.10".into());
        monitor.port = Some(27015);
        monitor
    }

    #[tokio::test]
    async fn missing_api_key_is_config_error() {
        let database = Arc::new(MemoryDatabase::new());
        let checker = SteamChecker::with_api_url(database, "http://127.0.0.1:9/").unwrap();
        let monitor = steam_monitor();
        let mut beat = Heartbeat::draft(&monitor, chrono::Utc::now(), None);

        let error = checker.check(&monitor, &mut beat).await.unwrap_err();
        assert!(matches!(error, CheckError::Config(_)));
        assert_eq!(error.to_string(), "Steam API Key not found");
    }

    #[test]
    fn parses_server_list() {
        let body = r#"{"response":{"servers":[{"addr":"192.0.2.10:27015","name":"Dust II 24/7"}]}}"#;
        let envelope: ServerListEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.response.servers[0].name, "Dust II 24/7");

        let empty: ServerListEnvelope = serde_json::from_str(r#"{"response":{}}"#).unwrap();
        assert!(empty.response.servers.is_empty());
    }
}
