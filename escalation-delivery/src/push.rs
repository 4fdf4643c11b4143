//! Push Channel over the device subscriptions of a user.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use escalation_core::channel::{PushChannel, PushNotification, PushReport};
use escalation_core::config::PushConfig;
use escalation_core::error::DeliveryError;
use escalation_core::store::SubscriptionStore;
use escalation_core::types::{DevicePlatform, DeviceSubscription, UserId};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

const MAX_TITLE_CHARS: usize = 100;
const MAX_BODY_CHARS: usize = 200;
const MAX_DATA_BYTES: usize = 1000;

/// Delivers one notification to one device token.
#[async_trait]
pub trait DeviceSender: Send + Sync {
    /// Returns [`DeliveryError::Gone`] when the token is no longer registered.
    async fn deliver(
        &self,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<(), DeliveryError>;
}

pub struct DevicePushChannel {
    config: PushConfig,
    subscriptions: Arc<dyn SubscriptionStore>,
    apns: Arc<dyn DeviceSender>,
    fcm: Arc<dyn DeviceSender>,
    backoff: Vec<Duration>,
}

impl DevicePushChannel {
    pub fn new(
        config: PushConfig,
        subscriptions: Arc<dyn SubscriptionStore>,
        apns: Arc<dyn DeviceSender>,
        fcm: Arc<dyn DeviceSender>,
    ) -> Self {
        Self {
            config,
            subscriptions,
            apns,
            fcm,
            backoff: vec![Duration::from_secs(1), Duration::from_secs(2)],
        }
    }

    /// Waits between attempts; one more attempt is made than there are delays.
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    fn sender_for(&self, platform: DevicePlatform) -> &Arc<dyn DeviceSender> {
        match platform {
            DevicePlatform::Ios => &self.apns,
            DevicePlatform::Android => &self.fcm,
        }
    }

    /// Applies defaults and size limits before anything is sent.
    pub fn normalize(&self, notification: &PushNotification) -> PushNotification {
        let title = if notification.title.trim().is_empty() {
            self.config.default_title.clone()
        } else {
            truncate_chars(&notification.title, MAX_TITLE_CHARS)
        };

        let body = if notification.body.trim().is_empty() {
            self.config.default_body.clone()
        } else {
            truncate_chars(&notification.body, MAX_BODY_CHARS)
        };

        let icon = match notification.icon.as_deref() {
            Some(icon) if icon.starts_with('/') || icon.starts_with("http") => icon.to_string(),
            _ => self.config.icon.clone(),
        };

        let badge = notification
            .badge
            .clone()
            .unwrap_or_else(|| self.config.badge.clone());

        let encoded_len = serde_json::to_string(&notification.data)
            .map(|s| s.len())
            .unwrap_or(usize::MAX);
        let data = if encoded_len > MAX_DATA_BYTES {
            tracing::warn!(bytes = encoded_len, "Push data too large, replacing");
            let mut truncated = Map::new();
            truncated.insert("truncated".to_string(), Value::Bool(true));
            truncated
        } else {
            notification.data.clone()
        };

        PushNotification {
            title,
            body,
            icon: Some(icon),
            badge: Some(badge),
            actions: notification.actions.clone(),
            data,
        }
    }

    async fn deliver_with_retry(
        &self,
        subscription: &DeviceSubscription,
        notification: &PushNotification,
    ) -> Result<(), DeliveryError> {
        let sender = self.sender_for(subscription.platform);
        let mut delays = self.backoff.iter();

        loop {
            let err = match sender.deliver(&subscription.device_token, notification).await {
                Ok(()) => return Ok(()),
                Err(DeliveryError::Gone) => return Err(DeliveryError::Gone),
                Err(e) => e,
            };

            match delays.next() {
                Some(delay) => {
                    tracing::debug!(
                        subscription = subscription.id,
                        "Push attempt failed, retrying in {:?}: {}",
                        delay,
                        err
                    );
                    tokio::time::sleep(*delay).await;
                }
                None => return Err(err),
            }
        }
    }
}

#[async_trait]
impl PushChannel for DevicePushChannel {
    async fn send_to_user(
        &self,
        user: UserId,
        notification: &PushNotification,
    ) -> Result<PushReport, DeliveryError> {
        if !self.config.enabled {
            tracing::debug!(user, "Push disabled, nothing sent");
            return Ok(PushReport::default());
        }

        let notification = self.normalize(notification);
        let since = Utc::now() - ChronoDuration::days(self.config.active_window_days);
        let subscriptions = self.subscriptions.active_subscriptions(user, since).await?;

        if subscriptions.is_empty() {
            tracing::debug!(user, "No active push subscriptions");
            return Ok(PushReport::default());
        }

        let mut sent = 0u32;
        let mut failed = 0u32;

        for subscription in &subscriptions {
            match self.deliver_with_retry(subscription, &notification).await {
                Ok(()) => {
                    sent += 1;
                    if let Err(e) = self
                        .subscriptions
                        .touch_subscription(subscription.id, Utc::now())
                        .await
                    {
                        tracing::warn!(subscription = subscription.id, "Failed to touch subscription: {}", e);
                    }
                }
                Err(DeliveryError::Gone) => {
                    failed += 1;
                    tracing::info!(
                        user,
                        subscription = subscription.id,
                        "Device no longer registered, removing subscription"
                    );
                    if let Err(e) = self.subscriptions.remove_subscription(subscription.id).await {
                        tracing::warn!(subscription = subscription.id, "Failed to remove subscription: {}", e);
                    }
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(user, subscription = subscription.id, "Push delivery failed: {}", e);
                }
            }
        }

        Ok(PushReport::from_counts(sent, failed))
    }
}

/// Keeps at most `max` characters, ending with "..." when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
