use anyhow::Result;
use async_trait::async_trait;
use escalation_core::channel::PushNotification;
use escalation_core::config::DeliveryConfig;
use escalation_core::error::DeliveryError;
use fcm::{Client, ErrorReason, MessageBuilder, NotificationBuilder};

use crate::push::DeviceSender;

pub struct FcmSender {
    client: Option<Client>,
    server_key: Option<String>,
}

impl FcmSender {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let (client, server_key) = if let Some(key) = &config.fcm_server_key {
            tracing::info!("Initializing FCM client");
            (Some(Client::new()), Some(key.clone()))
        } else {
            tracing::warn!("FCM delivery disabled (missing configuration)");
            (None, None)
        };

        Ok(Self { client, server_key })
    }
}

fn is_gone(reason: &ErrorReason) -> bool {
    matches!(reason, ErrorReason::NotRegistered | ErrorReason::InvalidRegistration)
}

#[async_trait]
impl DeviceSender for FcmSender {
    async fn deliver(
        &self,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<(), DeliveryError> {
        let (client, server_key) = match (&self.client, &self.server_key) {
            (Some(c), Some(k)) => (c, k),
            _ => return Err(DeliveryError::Misconfigured("FCM not configured".to_string())),
        };

        let mut notification_builder = NotificationBuilder::new();
        notification_builder.title(&notification.title);
        notification_builder.body(&notification.body);
        if let Some(icon) = notification.icon.as_deref() {
            notification_builder.icon(icon);
        }

        let mut message = MessageBuilder::new(server_key, device_token);
        message.notification(notification_builder.finalize());
        message
            .data(&notification.data)
            .map_err(|e| DeliveryError::Transport(format!("invalid FCM data: {}", e)))?;

        let response = client
            .send(message.finalize())
            .await
            .map_err(|e| DeliveryError::Transport(format!("FCM send failed: {:?}", e)))?;

        let reason = response
            .results
            .as_ref()
            .and_then(|results| results.iter().find_map(|r| r.error.as_ref()));

        match reason {
            None => Ok(()),
            Some(reason) if is_gone(reason) => Err(DeliveryError::Gone),
            Some(reason) => Err(DeliveryError::Transport(format!("FCM rejected message: {:?}", reason))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gone_reasons() {
        assert!(is_gone(&ErrorReason::NotRegistered));
        assert!(is_gone(&ErrorReason::InvalidRegistration));
        assert!(!is_gone(&ErrorReason::Unavailable));
    }

    #[test]
    fn test_disabled_without_server_key() {
        let config = DeliveryConfig {
            apns_bundle_id: None,
            apns_key_id: None,
            apns_team_id: None,
            apns_key_path: None,
            apns_key_content: None,
            fcm_server_key: None,
        };
        let sender = FcmSender::new(&config).unwrap();
        assert!(sender.client.is_none());
    }
}
