use anyhow::{anyhow, Result};
use async_trait::async_trait;
use escalation_core::channel::{CallbackChannel, CallbackPayload, CallbackResponse};
use escalation_core::config::CallbackConfig;
use escalation_core::error::DeliveryError;
use std::time::Duration;

/// Posts escalation payloads as JSON to one configured receiver.
pub struct HttpCallbackChannel {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpCallbackChannel {
    pub fn new(config: &CallbackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        match &config.url {
            Some(url) => tracing::info!("Callback channel posting to {}", url),
            None => tracing::warn!("Callback channel disabled (CALLBACK_URL not set)"),
        }

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl CallbackChannel for HttpCallbackChannel {
    fn target(&self) -> Option<&str> {
        self.url.as_deref()
    }

    async fn post(&self, payload: &CallbackPayload) -> Result<CallbackResponse, DeliveryError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| DeliveryError::Misconfigured("no callback url".to_string()))?;

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        // The status already arrived; a broken body must not hide it.
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    ticket = %payload.ticket_id,
                    status,
                    "Failed to read callback response body: {}",
                    e
                );
                format!("failed to read response body: {}", e)
            }
        };

        tracing::debug!(ticket = %payload.ticket_id, status, "Callback answered");
        Ok(CallbackResponse { status, body })
    }
}
