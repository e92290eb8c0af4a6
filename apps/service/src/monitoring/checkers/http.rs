use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Instant;

use base64::{Engine, prelude::BASE64_STANDARD};
use regex::Regex;
use reqwest::{
    Client, Method,
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    redirect,
};
use serde_json::Value;

use crate::database::models::Monitor;
use crate::monitoring::checker::{CheckError, Checker, required};
use crate::monitoring::types::{Heartbeat, MonitorStatus};

const SNIPPET_LIMIT: usize = 50;

static MARKUP_OR_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>?|[\n\r]|\s+").expect("static regex"));

/// HTTP(S) checker serving the `http`, `keyword` and `json-query` types
#[derive(Default)]
pub struct HttpChecker;

impl HttpChecker {
    pub fn new() -> Self {
        Self
    }

    /// Redirect limit and TLS leniency are per monitor, so each check gets
    /// its own client.
    fn client_for(monitor: &Monitor) -> Result<Client, CheckError> {
        let policy = if monitor.max_redirects == 0 {
            redirect::Policy::none()
        } else {
            redirect::Policy::limited(monitor.max_redirects as usize)
        };

        Client::builder()
            .timeout(monitor.timeout_duration())
            .redirect(policy)
            .danger_accept_invalid_certs(monitor.ignore_tls)
            .build()
            .map_err(|error| CheckError::Config(format!("Unable to build HTTP client: {error}")))
    }

    fn build_request(monitor: &Monitor, url: &str) -> Result<reqwest::RequestBuilder, CheckError> {
        let method = Method::from_bytes(monitor.method.trim().to_uppercase().as_bytes())
            .map_err(|_| CheckError::Config(format!("Invalid HTTP method: {}", monitor.method)))?;

        let mut request = Self::client_for(monitor)?
            .request(method, url)
            .header(ACCEPT, "*/*")
            .header(USER_AGENT, concat!("Vigil/", env!("CARGO_PKG_VERSION")));

        if let Some(raw) = monitor.headers.as_deref().filter(|raw| !raw.trim().is_empty()) {
            let headers: HashMap<String, String> = serde_json::from_str(raw)
                .map_err(|error| CheckError::Config(format!("Your JSON headers are invalid. {error}")))?;
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }

        if let Some(body) = monitor.body.as_deref().filter(|body| !body.trim().is_empty()) {
            request = match monitor.http_body_encoding.as_deref().unwrap_or("json") {
                "form" => request
                    .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(body.to_string()),
                "xml" => request.header(CONTENT_TYPE, "text/xml; charset=utf-8").body(body.to_string()),
                _ => {
                    let json: Value = serde_json::from_str(body).map_err(|error| {
                        CheckError::Config(format!("Your JSON body is invalid. {error}"))
                    })?;
                    request.json(&json)
                }
            };
        }

        if let Some(user) = monitor.basic_auth_user.as_deref().filter(|user| !user.is_empty()) {
            let password = monitor.basic_auth_pass.as_deref().unwrap_or_default();
            let token = BASE64_STANDARD.encode(format!("{user}:{password}"));
            request = request.header(AUTHORIZATION, format!("Basic {token}"));
        }

        Ok(request)
    }
}

#[async_trait::async_trait]
impl Checker for HttpChecker {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError> {
        let url = required(monitor.url.as_deref(), "URL")?;
        let request = Self::build_request(monitor, url)?;

        let start = Instant::now();
        let response = request.send().await?;
        heartbeat.ping = Some(start.elapsed().as_millis() as u64);

        let status = response.status();
        heartbeat.msg = format!("{} - {}", status.as_u16(), status.canonical_reason().unwrap_or("Unknown"));

        if !check_status_code(status.as_u16(), &monitor.accepted_status_codes) {
            return Err(CheckError::Assertion(format!(
                "Request failed with status code {}",
                status.as_u16()
            )));
        }

        match monitor.monitor_type.as_str() {
            "keyword" => {
                let keyword = required(monitor.keyword.as_deref(), "keyword")?;
                let body = response.text().await?;
                let found = body.contains(keyword);

                if found == !monitor.invert_keyword {
                    heartbeat.msg.push_str(if found { ", keyword is found" } else { ", keyword not found" });
                } else {
                    return Err(CheckError::Assertion(format!(
                        "{}, but keyword is {} in [{}]",
                        heartbeat.msg,
                        if found { "present" } else { "not" },
                        body_snippet(&body)
                    )));
                }
            }
            "json-query" => {
                let path = required(monitor.json_path.as_deref(), "JSON path")?;
                let expected = monitor.expected_value.as_deref().unwrap_or_default();
                let operator = monitor.json_path_operator.as_deref().unwrap_or("==");
                let data: Value = response.json().await?;

                heartbeat.msg = evaluate_json_query(&data, path, operator, expected)?;
            }
            _ => {}
        }

        heartbeat.status = MonitorStatus::Up;
        Ok(())
    }
}

/// Whether `status` falls in one of the accepted entries (`"200-299"` ranges
/// or single codes). An empty list accepts any 2xx.
pub fn check_status_code(status: u16, accepted: &[String]) -> bool {
    if accepted.is_empty() {
        return (200..300).contains(&status);
    }

    accepted.iter().any(|entry| match parse_status_entry(entry) {
        Some((low, high)) => (low..=high).contains(&status),
        None => false,
    })
}

/// Parses `"200-299"` or `"418"` into an inclusive range
pub fn parse_status_entry(entry: &str) -> Option<(u16, u16)> {
    let entry = entry.trim();
    match entry.split_once('-') {
        Some((low, high)) => {
            let low = low.trim().parse().ok()?;
            let high = high.trim().parse().ok()?;
            (low <= high).then_some((low, high))
        }
        None => entry.parse().ok().map(|code| (code, code)),
    }
}

/// Markup-free body excerpt for keyword failure messages
fn body_snippet(body: &str) -> String {
    let collapsed = MARKUP_OR_SPACE.replace_all(body, " ");
    let collapsed = collapsed.trim();

    if collapsed.chars().count() > SNIPPET_LIMIT {
        let head: String = collapsed.chars().take(SNIPPET_LIMIT - 3).collect();
        format!("{head}...")
    } else {
        collapsed.to_string()
    }
}

/// Walks a `$.a.b[0]` / `a.b.0` style path
fn select_json<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);

    let mut current = data;
    for segment in path.split(['.', '[']).map(|segment| segment.trim_end_matches(']')) {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            Value::Object(fields) => fields.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Compares the value at `path` with `expected`, returning the success
/// message or an assertion error.
pub fn evaluate_json_query(data: &Value, path: &str, operator: &str, expected: &str) -> Result<String, CheckError> {
    let actual = select_json(data, path)
        .map(json_to_text)
        .ok_or_else(|| CheckError::Assertion(format!("No value found at JSON path {path}")))?;

    let numbers = actual.trim().parse::<f64>().ok().zip(expected.trim().parse::<f64>().ok());
    let passes = match (operator, numbers) {
        ("==", Some((a, b))) => a == b,
        ("==", None) => actual == expected,
        ("!=", Some((a, b))) => a != b,
        ("!=", None) => actual != expected,
        ("<", Some((a, b))) => a < b,
        ("<=", Some((a, b))) => a <= b,
        (">", Some((a, b))) => a > b,
        (">=", Some((a, b))) => a >= b,
        ("<", None) => actual.as_str() < expected,
        ("<=", None) => actual.as_str() <= expected,
        (">", None) => actual.as_str() > expected,
        (">=", None) => actual.as_str() >= expected,
        ("contains", _) => actual.contains(expected),
        (other, _) => {
            return Err(CheckError::Config(format!("Unsupported JSON query operator: {other}")));
        }
    };

    let comparison = format!("comparing {actual} {operator} {expected}");
    if passes {
        Ok(format!("JSON query passes ({comparison})"))
    } else {
        Err(CheckError::Assertion(format!("JSON query does not pass ({comparison})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_ranges() {
        let accepted = vec!["200-299".to_string(), "418".to_string()];
        assert!(check_status_code(204, &accepted));
        assert!(check_status_code(418, &accepted));
        assert!(!check_status_code(404, &accepted));
        assert!(check_status_code(200, &[]));
        assert!(!check_status_code(301, &[]));
        assert!(!check_status_code(500, &["garbage".to_string()]));
        assert_eq!(parse_status_entry("300-200"), None);
    }

    #[test]
    fn snippet_strips_markup_and_truncates() {
        assert_eq!(body_snippet("<html><body>\n  Hello   world </body></html>"), "Hello world");

        let long = format!("<p>{}</p>", "x".repeat(80));
        let snippet = body_snippet(&long);
        assert_eq!(snippet.chars().count(), 50);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn json_query_paths_and_operators() {
        let data = json!({ "status": "ok", "checks": [{ "latency": 12 }, { "latency": 250 }] });

        assert_eq!(
            evaluate_json_query(&data, "$.status", "==", "ok").unwrap(),
            "JSON query passes (comparing ok == ok)"
        );
        assert!(evaluate_json_query(&data, "$.checks[1].latency", "<", "100").is_err());
        assert!(evaluate_json_query(&data, "checks.0.latency", "<=", "12").is_ok());
        assert!(evaluate_json_query(&data, "$.status", "contains", "o").is_ok());

        let missing = evaluate_json_query(&data, "$.nope", "==", "1").unwrap_err();
        assert_eq!(missing.to_string(), "No value found at JSON path $.nope");

        let failed = evaluate_json_query(&data, "$.status", "!=", "ok").unwrap_err();
        assert_eq!(failed.to_string(), "JSON query does not pass (comparing ok != ok)");

        assert!(matches!(
            evaluate_json_query(&data, "$.status", "~=", "ok"),
            Err(CheckError::Config(_))
        ));
    }

    #[tokio::test]
    async fn invalid_headers_are_reported() {
        let mut monitor = Monitor::new("api", "http");
        monitor.url = Some("http://127.0.0.1:9/".into());
        monitor.headers = Some("{not json".into());
        let mut beat = Heartbeat::draft(&monitor, chrono::Utc::now(), None);

        let error = HttpChecker::new().check(&monitor, &mut beat).await.unwrap_err();
        assert!(error.to_string().starts_with("Your JSON headers are invalid."));
    }
}
