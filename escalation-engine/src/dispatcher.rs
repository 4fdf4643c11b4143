//! Escalation of overdue tickets through the callback and push channels.

use chrono::{DateTime, Duration, Utc};
use escalation_core::channel::{CallbackPayload, PushAction, PushNotification};
use escalation_core::error::StoreError;
use escalation_core::store::{NotificationLedger, PushLogStore, TicketStore};
use escalation_core::types::{
    Assignee, DeliveryOutcome, LedgerClaim, LedgerKey, NewPushLogEntry, NotificationKind,
    OverdueTicket, PushOutcome, TicketId, User, UserId,
};
use escalation_core::EscalationContext;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::detector::detect_overdue;

/// Stored callback response bodies are cut to this many characters.
const RESPONSE_BODY_CHARS: usize = 1000;
const TEAM_LABEL: &str = "Whole team";
const UNASSIGNED_LABEL: &str = "Unassigned";
const UNKNOWN_REPORTER: &str = "Unknown";

fn push_window() -> Duration {
    Duration::hours(24)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub tickets_found: usize,
    pub callbacks_sent: usize,
    pub callbacks_failed: usize,
    pub callbacks_skipped: usize,
    pub pushes_sent: usize,
    pub pushes_failed: usize,
    pub pushes_skipped: usize,
    pub errors: Vec<String>,
}

enum PushAttempt {
    Sent,
    Failed,
    Skipped,
}

/// Detects overdue tickets and escalates each one in due order.
///
/// Only a failed detection query is returned as an error; everything that
/// goes wrong per ticket or per recipient ends up in the report.
pub async fn escalate(
    ctx: &EscalationContext,
    now: DateTime<Utc>,
) -> Result<EscalationReport, StoreError> {
    let overdue = detect_overdue(ctx.store.as_ref(), now).await?;

    let mut report = EscalationReport {
        tickets_found: overdue.len(),
        ..EscalationReport::default()
    };
    let delay = std::time::Duration::from_millis(ctx.config.callback.ticket_delay_ms);

    for (index, item) in overdue.iter().enumerate() {
        let due = match item.due() {
            Some(due) => due,
            None => continue,
        };
        let overdue_text = format_overdue(due, now);
        tracing::info!(ticket = %item.ticket.code, overdue = %overdue_text, "Escalating overdue ticket");

        notify_callback(ctx, item, due, &overdue_text, now, &mut report).await;
        notify_assignee(ctx, item, &overdue_text, now, &mut report).await;
        notify_admins(ctx, item, &overdue_text, now, &mut report).await;

        if !delay.is_zero() && index + 1 < overdue.len() {
            tokio::time::sleep(delay).await;
        }
    }

    tracing::info!(
        tickets = report.tickets_found,
        callbacks = report.callbacks_sent,
        pushes = report.pushes_sent,
        errors = report.errors.len(),
        "Escalation finished"
    );
    Ok(report)
}

/// Renders how long a ticket has been late, e.g. `"2h 5min"` or `"45min"`.
pub fn format_overdue(due: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - due).num_minutes().max(0);
    let hours = minutes / 60;
    let rest = minutes % 60;
    if hours > 0 {
        format!("{}h {}min", hours, rest)
    } else {
        format!("{}min", rest)
    }
}

pub fn build_payload(
    item: &OverdueTicket,
    due: DateTime<Utc>,
    overdue_text: &str,
    now: DateTime<Utc>,
) -> CallbackPayload {
    let ticket = &item.ticket;
    let assigned_to = match ticket.assignee {
        Some(Assignee::Team) => TEAM_LABEL.to_string(),
        _ => item
            .assignee_name
            .clone()
            .unwrap_or_else(|| UNASSIGNED_LABEL.to_string()),
    };

    CallbackPayload {
        ticket_id: ticket.code.clone(),
        title: ticket.title.clone(),
        description: ticket.description.clone().unwrap_or_default(),
        priority: ticket.priority.as_str().to_string(),
        status: ticket.status.as_str().to_string(),
        machine_type: item.machine.as_ref().map(|m| m.machine_type.clone()),
        model: item.machine.as_ref().and_then(|m| m.model.clone()),
        scheduled_date: due,
        assigned_to,
        reporter: item
            .reporter_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_REPORTER.to_string()),
        overdue_text: overdue_text.to_string(),
        created_at: ticket.created_at,
        notification_time: now,
    }
}

fn ticket_actions() -> Vec<PushAction> {
    vec![
        PushAction::new("view", "View"),
        PushAction::new("acknowledge", "On my way"),
    ]
}

fn ticket_data(item: &OverdueTicket) -> Map<String, Value> {
    let ticket = &item.ticket;
    let mut data = Map::new();
    data.insert("ticket_id".to_string(), json!(ticket.id));
    data.insert("ticket_code".to_string(), json!(ticket.code));
    data.insert("action".to_string(), json!("view_ticket"));
    data.insert("type".to_string(), json!("overdue"));
    data.insert("url".to_string(), json!(format!("/?ticket={}", ticket.id)));
    data
}

pub fn assignee_notification(
    ctx: &EscalationContext,
    item: &OverdueTicket,
    overdue_text: &str,
) -> PushNotification {
    PushNotification {
        title: "Ticket overdue".to_string(),
        body: format!("{} - overdue by {}", item.ticket.title, overdue_text),
        icon: Some(ctx.config.push.icon.clone()),
        badge: Some(ctx.config.push.badge.clone()),
        actions: ticket_actions(),
        data: ticket_data(item),
    }
}

pub fn admin_notification(
    ctx: &EscalationContext,
    item: &OverdueTicket,
    overdue_text: &str,
) -> PushNotification {
    let ticket = &item.ticket;
    let mut data = ticket_data(item);
    data.insert("priority".to_string(), json!(ticket.priority.as_str()));
    data.insert(
        "assigned_to".to_string(),
        json!(ticket.assignee.map(Assignee::to_column)),
    );

    PushNotification {
        title: "Escalation: ticket overdue".to_string(),
        body: format!("{}: {} - overdue by {}", ticket.code, ticket.title, overdue_text),
        icon: Some(ctx.config.push.icon.clone()),
        badge: Some(ctx.config.push.admin_badge.clone()),
        actions: ticket_actions(),
        data,
    }
}

async fn notify_callback(
    ctx: &EscalationContext,
    item: &OverdueTicket,
    due: DateTime<Utc>,
    overdue_text: &str,
    now: DateTime<Utc>,
    report: &mut EscalationReport,
) {
    let code = &item.ticket.code;
    let target = match ctx.callback.target() {
        Some(target) => target.to_string(),
        None => return,
    };

    let claim = LedgerClaim {
        key: LedgerKey {
            ticket_id: item.ticket.id,
            due,
            kind: NotificationKind::OverdueEscalation,
        },
        target,
        sent_at: now,
    };

    let entry_id = match ctx.store.claim(&claim).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!(ticket = %code, "Callback already sent for this due date");
            report.callbacks_skipped += 1;
            return;
        }
        Err(e) => {
            tracing::error!(ticket = %code, "Failed to claim ledger entry: {}", e);
            report.errors.push(format!("{}: ledger claim failed: {}", code, e));
            return;
        }
    };

    let payload = build_payload(item, due, overdue_text, now);
    let outcome = match ctx.callback.post(&payload).await {
        Ok(response) => {
            tracing::info!(ticket = %code, status = response.status, "Callback delivered");
            report.callbacks_sent += 1;
            DeliveryOutcome {
                status: Some(i32::from(response.status)),
                body: truncate_chars(&response.body, RESPONSE_BODY_CHARS),
            }
        }
        Err(e) => {
            tracing::warn!(ticket = %code, "Callback delivery failed: {}", e);
            report.callbacks_failed += 1;
            DeliveryOutcome {
                status: None,
                body: truncate_chars(&e.to_string(), RESPONSE_BODY_CHARS),
            }
        }
    };

    if let Err(e) = ctx.store.record_outcome(entry_id, &outcome, Utc::now()).await {
        tracing::error!(ticket = %code, "Failed to record callback outcome: {}", e);
        report.errors.push(format!("{}: recording callback outcome failed: {}", code, e));
    }
}

async fn notify_assignee(
    ctx: &EscalationContext,
    item: &OverdueTicket,
    overdue_text: &str,
    now: DateTime<Utc>,
    report: &mut EscalationReport,
) {
    let user = match item.ticket.assignee.and_then(Assignee::user_id) {
        Some(user) => user,
        None => return,
    };

    let notification = assignee_notification(ctx, item, overdue_text);
    let attempt = push_once(ctx, user, item.ticket.id, &notification, now).await;
    tally(report, &item.ticket.code, user, attempt);
}

async fn notify_admins(
    ctx: &EscalationContext,
    item: &OverdueTicket,
    overdue_text: &str,
    now: DateTime<Utc>,
    report: &mut EscalationReport,
) {
    let code = &item.ticket.code;
    let admins: Vec<User> = match ctx.store.list_admins().await {
        Ok(admins) => admins,
        Err(e) => {
            tracing::error!(ticket = %code, "Failed to list admins: {}", e);
            report.errors.push(format!("{}: listing admins failed: {}", code, e));
            return;
        }
    };

    if admins.is_empty() {
        return;
    }
    tracing::debug!(ticket = %code, admins = admins.len(), "Notifying admins");

    let notification = admin_notification(ctx, item, overdue_text);
    for admin in &admins {
        let attempt = push_once(ctx, admin.id, item.ticket.id, &notification, now).await;
        tally(report, code, admin.id, attempt);
    }
}

fn tally(
    report: &mut EscalationReport,
    code: &str,
    user: UserId,
    attempt: Result<PushAttempt, StoreError>,
) {
    match attempt {
        Ok(PushAttempt::Sent) => report.pushes_sent += 1,
        Ok(PushAttempt::Failed) => report.pushes_failed += 1,
        Ok(PushAttempt::Skipped) => report.pushes_skipped += 1,
        Err(e) => {
            tracing::error!(ticket = %code, user, "Push bookkeeping failed: {}", e);
            report.pushes_failed += 1;
            report.errors.push(format!("{}: push to user {} failed: {}", code, user, e));
        }
    }
}

/// Sends one push unless the user was already pushed about this ticket in
/// the last 24 hours, then records the outcome in the push log.
async fn push_once(
    ctx: &EscalationContext,
    user: UserId,
    ticket: TicketId,
    notification: &PushNotification,
    now: DateTime<Utc>,
) -> Result<PushAttempt, StoreError> {
    if ctx.store.has_recent_push(user, ticket, now - push_window()).await? {
        tracing::debug!(user, ticket, "Push already sent within the window");
        return Ok(PushAttempt::Skipped);
    }

    let (outcome, error_message) = match ctx.push.send_to_user(user, notification).await {
        Ok(result) if result.success => {
            tracing::info!(user, ticket, devices = result.sent_count, "Push sent");
            (PushOutcome::Success, None)
        }
        Ok(result) => {
            tracing::warn!(user, ticket, "Push reached no device");
            let detail = serde_json::to_string(&result).unwrap_or_default();
            (PushOutcome::Failed, Some(detail))
        }
        Err(e) => {
            tracing::warn!(user, ticket, "Push failed: {}", e);
            (PushOutcome::Error, Some(e.to_string()))
        }
    };

    ctx.store
        .append_push_log(&NewPushLogEntry {
            user_id: user,
            ticket_id: ticket,
            outcome,
            error_message,
            created_at: now,
        })
        .await?;

    Ok(match outcome {
        PushOutcome::Success => PushAttempt::Sent,
        PushOutcome::Failed | PushOutcome::Error => PushAttempt::Failed,
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
