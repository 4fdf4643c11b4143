use a2::{Client, DefaultNotificationBuilder, NotificationBuilder, NotificationOptions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use escalation_core::channel::PushNotification;
use escalation_core::config::DeliveryConfig;
use escalation_core::error::DeliveryError;
use std::fs;

use crate::push::DeviceSender;

/// APNs status for a token that is no longer valid for the topic.
const APNS_GONE: u16 = 410;

pub struct ApnsSender {
    client: Option<Client>,
    bundle_id: String,
}

impl ApnsSender {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let bundle_id = config.apns_bundle_id.clone().unwrap_or_default();

        let client = if let (Some(key_id), Some(team_id)) = (
            &config.apns_key_id,
            &config.apns_team_id,
        ) {
            tracing::info!("Initializing APNs client");

            let key_content = if let Some(key_content_base64) = &config.apns_key_content {
                use base64::Engine;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(key_content_base64)
                    .map_err(|e| anyhow!("Failed to decode base64 APNs key: {}", e))?;
                String::from_utf8(decoded)
                    .map_err(|e| anyhow!("Failed to convert APNs key to UTF-8: {}", e))?
            } else if let Some(key_path) = &config.apns_key_path {
                fs::read_to_string(key_path)
                    .map_err(|e| anyhow!("Failed to read APNs key file {}: {}", key_path, e))?
            } else {
                return Err(anyhow!("Either APNS_KEY_PATH or APNS_KEY_CONTENT must be provided"));
            };

            let endpoint = if bundle_id.contains("sandbox") || bundle_id.contains("dev") {
                a2::Endpoint::Sandbox
            } else {
                a2::Endpoint::Production
            };
            let client = Client::token(key_content.as_bytes(), key_id, team_id, endpoint)
                .map_err(|e| anyhow!("Failed to create APNs client: {}", e))?;

            tracing::info!("APNs client initialized successfully");
            Some(client)
        } else {
            tracing::warn!("APNs delivery disabled (missing configuration)");
            None
        };

        Ok(Self { client, bundle_id })
    }
}

#[async_trait]
impl DeviceSender for ApnsSender {
    async fn deliver(
        &self,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<(), DeliveryError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| DeliveryError::Misconfigured("APNs not configured".to_string()))?;

        let mut builder = DefaultNotificationBuilder::new()
            .set_title(&notification.title)
            .set_body(&notification.body)
            .set_sound("default");
        if let Some(action) = notification.actions.first() {
            builder = builder.set_category(&action.action);
        }

        let mut options = NotificationOptions::default();
        if !self.bundle_id.is_empty() {
            options.apns_topic = Some(&self.bundle_id);
        }

        let mut payload = builder.build(device_token, options);
        payload
            .add_custom_data("data", &notification.data)
            .map_err(|e| DeliveryError::Transport(format!("invalid APNs custom data: {}", e)))?;

        match client.send(payload).await {
            Ok(response) => {
                tracing::debug!("APNs accepted notification: {:?}", response);
                Ok(())
            }
            Err(a2::Error::ResponseError(response)) if response.code == APNS_GONE => {
                Err(DeliveryError::Gone)
            }
            Err(e) => Err(DeliveryError::Transport(format!("APNs send failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escalation_core::config::DeliveryConfig;

    fn unconfigured() -> DeliveryConfig {
        DeliveryConfig {
            apns_bundle_id: None,
            apns_key_id: None,
            apns_team_id: None,
            apns_key_path: None,
            apns_key_content: None,
            fcm_server_key: None,
        }
    }

    #[tokio::test]
    async fn test_unconfigured_sender_is_misconfigured() {
        let sender = ApnsSender::new(&unconfigured()).unwrap();
        let notification = PushNotification {
            title: "t".to_string(),
            body: "b".to_string(),
            icon: None,
            badge: None,
            actions: Vec::new(),
            data: Default::default(),
        };
        let err = sender.deliver("abc", &notification).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Misconfigured(_)));
    }

    #[test]
    fn test_key_material_is_required() {
        let config = DeliveryConfig {
            apns_key_id: Some("KEY".to_string()),
            apns_team_id: Some("TEAM".to_string()),
            ..unconfigured()
        };
        assert!(ApnsSender::new(&config).is_err());
    }
}
