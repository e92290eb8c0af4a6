//! Monitor-type specific validation, run before a runner is started.

use thiserror::Error;
use url::Url;

use super::MonitoringExecutor;
use super::checkers::{dns, http::parse_status_entry};
use crate::database::models::{Monitor, PUSH_TYPE};

/// Shortest allowed check interval in seconds
pub const MIN_INTERVAL_SECONDS: u64 = 20;
/// Longest allowed check interval in seconds (24 days)
pub const MAX_INTERVAL_SECONDS: u64 = 2_073_600;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Interval cannot be less than 20 seconds (got {0})")]
    IntervalTooShort(u64),
    #[error("Interval cannot be more than 2073600 seconds (got {0})")]
    IntervalTooLong(u64),
    #[error("Retry interval cannot be more than 2073600 seconds (got {0})")]
    RetryIntervalTooLong(u64),
    #[error("Timeout must be between 0 and the interval in seconds (got {0})")]
    InvalidTimeout(f64),
    #[error("Unsupported monitor type: {0}")]
    UnsupportedType(String),
    #[error("{monitor_type} monitors require {field}")]
    MissingField { monitor_type: String, field: &'static str },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid accepted status code entry: {0}")]
    InvalidStatusCode(String),
    #[error("Invalid DNS record type: {0}")]
    InvalidRecordType(String),
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|value| !value.trim().is_empty())
}

fn require(monitor: &Monitor, ok: bool, field: &'static str) -> Result<(), ValidationError> {
    if ok {
        Ok(())
    } else {
        Err(ValidationError::MissingField { monitor_type: monitor.monitor_type.clone(), field })
    }
}

/// Validate check interval bounds
pub fn validate_check_interval(monitor: &Monitor) -> Result<(), ValidationError> {
    if monitor.interval < MIN_INTERVAL_SECONDS {
        return Err(ValidationError::IntervalTooShort(monitor.interval));
    }
    if monitor.interval > MAX_INTERVAL_SECONDS {
        return Err(ValidationError::IntervalTooLong(monitor.interval));
    }
    if monitor.retry_interval > MAX_INTERVAL_SECONDS {
        return Err(ValidationError::RetryIntervalTooLong(monitor.retry_interval));
    }
    // 0 derives the timeout from the interval
    if !monitor.timeout.is_finite() || monitor.timeout < 0.0 || monitor.timeout > monitor.interval as f64 {
        return Err(ValidationError::InvalidTimeout(monitor.timeout));
    }
    Ok(())
}

/// Validate HTTP family target
fn validate_http_target(monitor: &Monitor) -> Result<(), ValidationError> {
    require(monitor, present(&monitor.url), "a URL")?;
    let raw = monitor.url.as_deref().unwrap_or_default().trim();
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl(format!("{raw}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::InvalidUrl(format!("unsupported scheme {other}"))),
    }

    for entry in &monitor.accepted_status_codes {
        if parse_status_entry(entry).is_none() {
            return Err(ValidationError::InvalidStatusCode(entry.clone()));
        }
    }

    match monitor.monitor_type.as_str() {
        "keyword" => require(monitor, present(&monitor.keyword), "a keyword"),
        "json-query" => {
            require(monitor, present(&monitor.json_path), "a JSON path")?;
            require(monitor, monitor.expected_value.is_some(), "an expected value")
        }
        _ => Ok(()),
    }
}

/// Validates a monitor before it is scheduled
pub fn validate_monitor(monitor: &Monitor, executor: &MonitoringExecutor) -> Result<(), ValidationError> {
    if monitor.monitor_type != PUSH_TYPE && !executor.supports(&monitor.monitor_type) {
        return Err(ValidationError::UnsupportedType(monitor.monitor_type.clone()));
    }

    validate_check_interval(monitor)?;

    match monitor.monitor_type.as_str() {
        "http" | "keyword" | "json-query" => validate_http_target(monitor),
        "port" | "steam" => {
            require(monitor, present(&monitor.hostname), "a hostname")?;
            require(monitor, monitor.port.is_some_and(|port| port != 0), "a port")
        }
        "ping" | "smtp" => require(monitor, present(&monitor.hostname), "a hostname"),
        "dns" => {
            require(monitor, present(&monitor.hostname), "a hostname")?;
            dns::record_type(monitor)
                .map(|_| ())
                .map_err(|_| ValidationError::InvalidRecordType(monitor.dns_resolve_type.clone().unwrap_or_default()))
        }
        "push" => require(monitor, present(&monitor.push_token), "a push token"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> MonitoringExecutor {
        let database: std::sync::Arc<dyn crate::database::Database> =
            std::sync::Arc::new(crate::database::MemoryDatabase::new());
        MonitoringExecutor::with_defaults(database).unwrap()
    }

    fn http(url: &str) -> Monitor {
        let mut monitor = Monitor::new("site", "http");
        monitor.url = Some(url.into());
        monitor
    }

    #[test]
    fn test_validate_check_interval() {
        let mut monitor = http("https://example.com");
        monitor.interval = 20;
        assert!(validate_check_interval(&monitor).is_ok());
        monitor.interval = MAX_INTERVAL_SECONDS;
        assert!(validate_check_interval(&monitor).is_ok());

        monitor.interval = 19;
        assert_eq!(validate_check_interval(&monitor), Err(ValidationError::IntervalTooShort(19)));
        monitor.interval = MAX_INTERVAL_SECONDS + 1;
        assert!(validate_check_interval(&monitor).is_err());
    }

    #[test]
    fn test_timeout_must_fit_the_interval() {
        let mut monitor = http("https://example.com");
        monitor.interval = 60;
        for ok in [0.0, 0.5, 48.0, 60.0] {
            monitor.timeout = ok;
            assert!(validate_check_interval(&monitor).is_ok(), "{ok} rejected");
        }

        monitor.timeout = 61.0;
        assert_eq!(validate_check_interval(&monitor), Err(ValidationError::InvalidTimeout(61.0)));
        monitor.timeout = -1.0;
        assert!(validate_check_interval(&monitor).is_err());
        monitor.timeout = f64::INFINITY;
        assert!(validate_monitor(&monitor, &executor()).is_err());
        monitor.timeout = f64::NAN;
        assert!(validate_monitor(&monitor, &executor()).is_err());
    }

    #[test]
    fn test_validate_http_target() {
        let executor = executor();
        assert!(validate_monitor(&http("https://example.com"), &executor).is_ok());
        // Self-hosted: private targets are allowed
        assert!(validate_monitor(&http("http://192.168.1.1:8080"), &executor).is_ok());

        assert!(matches!(
            validate_monitor(&http("ftp://example.com"), &executor),
            Err(ValidationError::InvalidUrl(_))
        ));
        assert!(matches!(
            validate_monitor(&http("not a url"), &executor),
            Err(ValidationError::InvalidUrl(_))
        ));

        let mut bad_codes = http("https://example.com");
        bad_codes.accepted_status_codes = vec!["2xx".into()];
        assert_eq!(
            validate_monitor(&bad_codes, &executor),
            Err(ValidationError::InvalidStatusCode("2xx".into()))
        );

        let mut keyword = http("https://example.com");
        keyword.monitor_type = "keyword".into();
        assert_eq!(
            validate_monitor(&keyword, &executor).unwrap_err().to_string(),
            "keyword monitors require a keyword"
        );
    }

    #[test]
    fn test_type_specific_fields() {
        let executor = executor();

        let mut port = Monitor::new("db", "port");
        port.hostname = Some("db.internal".into());
        assert!(validate_monitor(&port, &executor).is_err());
        port.port = Some(5432);
        assert!(validate_monitor(&port, &executor).is_ok());

        let mut push = Monitor::new("cron", "push");
        assert!(validate_monitor(&push, &executor).is_err());
        push.push_token = Some("abc".into());
        assert!(validate_monitor(&push, &executor).is_ok());

        let mut dns = Monitor::new("dns", "dns");
        dns.hostname = Some("example.com".into());
        dns.dns_resolve_type = Some("BOGUS".into());
        assert_eq!(
            validate_monitor(&dns, &executor),
            Err(ValidationError::InvalidRecordType("BOGUS".into()))
        );

        assert_eq!(
            validate_monitor(&Monitor::new("x", "gopher"), &executor),
            Err(ValidationError::UnsupportedType("gopher".into()))
        );
        assert!(validate_monitor(&Monitor::new("services", "group"), &executor).is_ok());
    }
}
