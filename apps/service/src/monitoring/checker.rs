use std::time::Duration;

use thiserror::Error;

use super::types::Heartbeat;
use crate::database::models::Monitor;

/// Why a single check failed. Every variant means "this beat failed"; the
/// display text becomes the heartbeat message.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{0}")]
    Network(String),

    #[error("timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("{0}")]
    Assertion(String),

    #[error("{0}")]
    Config(String),

    /// The engine could not gather what the check needs, e.g. a store read
    #[error("{0}")]
    Internal(String),
}

impl From<reqwest::Error> for CheckError {
    fn from(error: reqwest::Error) -> Self {
        CheckError::Network(describe_error(&error))
    }
}

/// Flattens an error and its sources into one line.
pub fn describe_error(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Checker trait for the different monitor types.
///
/// The draft heartbeat arrives failed (DOWN, or UP when upside-down) with no
/// ping and an empty message. A checker that completes sets status, message
/// and ping; a checker that fails returns the reason and leaves retries,
/// persistence and notification to the runner.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, monitor: &Monitor, heartbeat: &mut Heartbeat) -> Result<(), CheckError>;
}

pub(crate) fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, CheckError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CheckError::Config(format!("Monitor has no {field} configured")))
}
