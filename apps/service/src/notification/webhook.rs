use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{NotificationProvider, SenderError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookConfig {
    #[serde(rename = "webhookURL")]
    webhook_url: String,
    #[serde(default)]
    webhook_additional_headers: Option<HashMap<String, String>>,
}

/// POSTs `{ heartbeat, monitor, msg }` as JSON to a configured URL.
pub struct WebhookProvider {
    client: Client,
}

impl Default for WebhookProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookProvider {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

pub(crate) fn payload(message: &str, monitor: Option<&Value>, heartbeat: Option<&Value>) -> Value {
    json!({
        "heartbeat": heartbeat,
        "monitor": monitor,
        "msg": message,
    })
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    async fn send(
        &self,
        config: &Value,
        message: &str,
        monitor: Option<&Value>,
        heartbeat: Option<&Value>,
    ) -> Result<(), SenderError> {
        let config: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| SenderError::InvalidConfiguration(e.to_string()))?;

        let mut request_builder = self.client.post(&config.webhook_url);

        if let Some(headers) = &config.webhook_additional_headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in headers {
                let header_name = header::HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header name: {}", e)))?;
                let header_value = header::HeaderValue::from_str(value)
                    .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid header value: {}", e)))?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        let response = request_builder.json(&payload(message, monitor, heartbeat)).send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {}. Body: {}",
                status, error_body
            )));
        }

        Ok(())
    }
}
