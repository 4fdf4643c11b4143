//! Removal of idle device subscriptions and aged auxiliary records.

use chrono::{DateTime, Duration, Months, Utc};
use escalation_core::error::StoreError;
use escalation_core::store::RetentionStore;
use escalation_core::EscalationContext;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskReport {
    pub name: String,
    pub affected: u64,
    pub error: Option<String>,
}

impl SubtaskReport {
    fn from_result(name: &str, result: Result<u64, StoreError>) -> Self {
        match result {
            Ok(affected) => {
                tracing::info!(subtask = name, affected, "Cleanup subtask finished");
                Self {
                    name: name.to_string(),
                    affected,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(subtask = name, "Cleanup subtask failed: {}", e);
                Self {
                    name: name.to_string(),
                    affected: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCleanupReport {
    pub deleted: u64,
    pub remaining: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub subtasks: Vec<SubtaskReport>,
}

impl RetentionReport {
    pub fn subtask(&self, name: &str) -> Option<&SubtaskReport> {
        self.subtasks.iter().find(|s| s.name == name)
    }
}

/// Deletes device subscriptions unused for longer than the idle window.
pub async fn cleanup_subscriptions(
    ctx: &EscalationContext,
    now: DateTime<Utc>,
) -> Result<SubscriptionCleanupReport, StoreError> {
    let cutoff = now - Duration::days(ctx.config.retention.subscription_idle_days);

    let idle = ctx.store.idle_subscriptions(cutoff).await?;
    for sub in &idle {
        tracing::info!(
            subscription = sub.id,
            user = sub.user_id,
            device = sub.device_name.as_deref().unwrap_or("unnamed"),
            last_used = %sub.last_used,
            "Removing idle push subscription"
        );
    }

    let deleted = if idle.is_empty() {
        0
    } else {
        ctx.store.delete_idle_subscriptions(cutoff).await?
    };
    let remaining = ctx.store.count_subscriptions().await?;

    tracing::info!(deleted, remaining, "Push subscription cleanup finished");
    Ok(SubscriptionCleanupReport { deleted, remaining })
}

/// Planning entries dated strictly before this day are removed.
pub fn planning_cutoff(now: DateTime<Utc>, months: u32) -> Option<chrono::NaiveDate> {
    now.date_naive().checked_sub_months(Months::new(months))
}

/// Runs every retention subtask; a failing one does not stop the others.
pub async fn run_retention(ctx: &EscalationContext, now: DateTime<Utc>) -> RetentionReport {
    let retention = &ctx.config.retention;
    let mut report = RetentionReport::default();

    let planning = match planning_cutoff(now, retention.planning_retention_months) {
        Some(cutoff) => ctx.store.delete_planning_before(cutoff).await,
        None => Err(StoreError::Unavailable("planning cutoff out of range".to_string())),
    };
    report
        .subtasks
        .push(SubtaskReport::from_result("planning_entries", planning));

    let notes_cutoff = now - Duration::days(retention.note_retention_days);
    let notes = ctx.store.delete_completed_notes_before(notes_cutoff).await;
    report
        .subtasks
        .push(SubtaskReport::from_result("completed_notes", notes));

    let optimize = ctx.store.optimize().await.map(|()| 0);
    report
        .subtasks
        .push(SubtaskReport::from_result("optimize", optimize));

    report
}
