//! Outbound channel interfaces used by the dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DeliveryError;
use crate::types::UserId;

/// JSON body posted to the callback receiver for one overdue ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Human-readable ticket code.
    pub ticket_id: String,
    pub title: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub machine_type: Option<String>,
    pub model: Option<String>,
    pub scheduled_date: DateTime<Utc>,
    pub assigned_to: String,
    pub reporter: String,
    pub overdue_text: String,
    pub created_at: DateTime<Utc>,
    pub notification_time: DateTime<Utc>,
}

/// What the receiver answered. Any status counts as delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait CallbackChannel: Send + Sync {
    /// Configured endpoint, or `None` when the channel is disabled.
    fn target(&self) -> Option<&str>;

    async fn post(&self, payload: &CallbackPayload) -> Result<CallbackResponse, DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAction {
    pub action: String,
    pub title: String,
}

impl PushAction {
    pub fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
        }
    }
}

/// A notification addressed to every active device of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    #[serde(default)]
    pub actions: Vec<PushAction>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Result of a push to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReport {
    pub success: bool,
    pub sent_count: u32,
    pub failed_count: u32,
}

impl PushReport {
    pub fn from_counts(sent_count: u32, failed_count: u32) -> Self {
        Self {
            success: sent_count > 0,
            sent_count,
            failed_count,
        }
    }
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn send_to_user(
        &self,
        user: UserId,
        notification: &PushNotification,
    ) -> Result<PushReport, DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success_follows_sent_count() {
        assert!(PushReport::from_counts(1, 2).success);
        assert!(!PushReport::from_counts(0, 2).success);
        assert_eq!(
            serde_json::to_value(PushReport::from_counts(2, 1)).unwrap(),
            serde_json::json!({"success": true, "sentCount": 2, "failedCount": 1})
        );
    }
}
