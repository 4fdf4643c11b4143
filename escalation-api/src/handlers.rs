use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use escalation_core::store::{NotificationLedger, PushLogStore};
use escalation_core::types::TicketId;
use escalation_engine::{EscalationTask, GroupSummary, RunPermit, RunSummary, Tick};
use serde_json::Value;

const MANUAL_SCHEDULE: &str = "manual";

pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "escalation-api"
    }))
}

fn group_response(summary: GroupSummary) -> (StatusCode, Json<GroupSummary>) {
    let status = if summary.is_completed() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(summary))
}

/// Manual triggers never wait behind a running invocation.
fn permit_or_conflict(task: &EscalationTask) -> Result<RunPermit<'_>, StatusCode> {
    task.try_acquire().ok_or_else(|| {
        tracing::warn!("Manual trigger rejected: a run is already in progress");
        StatusCode::CONFLICT
    })
}

pub async fn check_overdue(
    Extension(task): Extension<EscalationTask>,
) -> Result<(StatusCode, Json<GroupSummary>), StatusCode> {
    tracing::info!("Manual overdue check triggered");
    let permit = permit_or_conflict(&task)?;
    Ok(group_response(permit.escalation(Utc::now()).await))
}

pub async fn cleanup_push_tokens(
    Extension(task): Extension<EscalationTask>,
) -> Result<(StatusCode, Json<GroupSummary>), StatusCode> {
    tracing::info!("Manual push subscription cleanup triggered");
    let permit = permit_or_conflict(&task)?;
    Ok(group_response(permit.subscription_cleanup(Utc::now()).await))
}

pub async fn run_all(
    Extension(task): Extension<EscalationTask>,
) -> Result<Json<RunSummary>, StatusCode> {
    tracing::info!("Manual full run triggered");
    let permit = permit_or_conflict(&task)?;
    Ok(Json(permit.run_at(Tick::now(MANUAL_SCHEDULE), Utc::now()).await))
}

/// Ledger entries and push log rows written for one ticket.
pub async fn ticket_history(
    Extension(task): Extension<EscalationTask>,
    Path(ticket_id): Path<TicketId>,
) -> Result<Json<Value>, StatusCode> {
    let store = &task.context().store;

    let ledger = store.entries_for_ticket(ticket_id).await.map_err(|e| {
        tracing::error!(ticket = ticket_id, "Failed to load ledger entries: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let pushes = store.push_logs_for_ticket(ticket_id).await.map_err(|e| {
        tracing::error!(ticket = ticket_id, "Failed to load push logs: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(serde_json::json!({
        "ticket_id": ticket_id,
        "callbacks": ledger,
        "pushes": pushes,
    })))
}
