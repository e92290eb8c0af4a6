use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monitor types that are not served by an outbound checker
pub const PUSH_TYPE: &str = "push";
pub const GROUP_TYPE: &str = "group";

/// Monitor model - one probe definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Monitor {
    /// Store id, 0 until the monitor has been saved
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub monitor_type: String,

    pub url: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,

    pub keyword: Option<String>,
    pub invert_keyword: bool,
    pub json_path: Option<String>,
    pub json_path_operator: Option<String>,
    pub expected_value: Option<String>,

    pub method: String,
    /// JSON object text
    pub headers: Option<String>,
    pub body: Option<String>,
    pub http_body_encoding: Option<String>,
    pub basic_auth_user: Option<String>,
    #[serde(skip_serializing)]
    pub basic_auth_pass: Option<String>,
    pub accepted_status_codes: Vec<String>,
    pub max_redirects: u32,
    pub ignore_tls: bool,

    pub dns_resolve_type: Option<String>,
    pub dns_resolve_server: Option<String>,
    pub smtp_security: Option<String>,
    pub push_token: Option<String>,
    pub parent: Option<i64>,

    pub interval: u64,
    pub retry_interval: u64,
    pub max_retries: u32,
    pub resend_interval: u32,
    /// Seconds, 0 derives the timeout from the interval
    pub timeout: f64,
    pub upside_down: bool,
    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for Monitor {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            user_id: 0,
            name: String::new(),
            monitor_type: "http".into(),
            url: None,
            hostname: None,
            port: None,
            keyword: None,
            invert_keyword: false,
            json_path: None,
            json_path_operator: None,
            expected_value: None,
            method: "GET".into(),
            headers: None,
            body: None,
            http_body_encoding: None,
            basic_auth_user: None,
            basic_auth_pass: None,
            accepted_status_codes: vec!["200-299".into()],
            max_redirects: 10,
            ignore_tls: false,
            dns_resolve_type: None,
            dns_resolve_server: None,
            smtp_security: None,
            push_token: None,
            parent: None,
            interval: 60,
            retry_interval: 60,
            max_retries: 0,
            resend_interval: 0,
            timeout: 0.0,
            upside_down: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Monitor {
    /// Create a new monitor
    pub fn new(name: impl Into<String>, monitor_type: impl Into<String>) -> Self {
        Self { name: name.into(), monitor_type: monitor_type.into(), ..Self::default() }
    }

    pub fn is_push(&self) -> bool {
        self.monitor_type == PUSH_TYPE
    }

    /// Name used in messages, `#id` when the monitor is unnamed
    pub fn label(&self) -> String {
        if self.name.trim().is_empty() {
            format!("#{}", self.id)
        } else {
            self.name.clone()
        }
    }

    /// Upper bound for a single check.
    ///
    /// An unset timeout is 80% of the interval. Never below one second; a
    /// value that does not fit a `Duration` falls back to the interval.
    pub fn timeout_duration(&self) -> Duration {
        let seconds = if self.timeout > 0.0 {
            self.timeout
        } else {
            self.interval as f64 * 0.8
        };
        Duration::try_from_secs_f64(seconds.max(1.0)).unwrap_or(Duration::from_secs(self.interval.max(1)))
    }

    /// Public JSON form; the basic auth password never leaves the process.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// A configured notification target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: i64,
    pub name: String,
    /// Provider key, e.g. `webhook`
    pub provider: String,
    pub config: Value,
    pub active: bool,
}

impl NotificationConfig {
    pub fn new(name: impl Into<String>, provider: impl Into<String>, config: Value) -> Self {
        Self { id: 0, name: name.into(), provider: provider.into(), config, active: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_to_most_of_the_interval() {
        let mut monitor = Monitor::new("api", "http");
        monitor.interval = 60;
        assert_eq!(monitor.timeout_duration(), Duration::from_secs(48));

        monitor.timeout = 5.5;
        assert_eq!(monitor.timeout_duration(), Duration::from_millis(5500));

        monitor.timeout = 0.0;
        monitor.interval = 1;
        assert_eq!(monitor.timeout_duration(), Duration::from_secs(1));

        monitor.interval = 60;
        monitor.timeout = f64::INFINITY;
        assert_eq!(monitor.timeout_duration(), Duration::from_secs(60));
        monitor.timeout = 1e300;
        assert_eq!(monitor.timeout_duration(), Duration::from_secs(60));
    }

    #[test]
    fn label_falls_back_to_id() {
        let mut monitor = Monitor::new("", "group");
        monitor.id = 12;
        assert_eq!(monitor.label(), "#12");
        monitor.name = "db".into();
        assert_eq!(monitor.label(), "db");
    }

    #[test]
    fn json_hides_password() {
        let mut monitor = Monitor::new("api", "http");
        monitor.basic_auth_user = Some("admin".into());
        monitor.basic_auth_pass = Some("hunter2".into());

        let json = monitor.to_json();
        assert_eq!(json["type"], "http");
        assert_eq!(json["basicAuthUser"], "admin");
        assert!(json.get("basicAuthPass").is_none());
    }
}
