//! Diesel row types and their conversion into domain types.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::error::StoreError;
use crate::schema::{machines, push_logs, push_subscriptions, tickets, users, webhook_notifications};
use crate::types::{
    Assignee, DeliveryOutcome, DeviceSubscription, LedgerClaim, LedgerEntry, Machine,
    NewPushLogEntry, PushLogEntry, Role, Ticket, User,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tickets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TicketRow {
    pub id: i64,
    pub ticket_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    pub machine_id: Option<i64>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<i64>,
    pub reported_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            code: row.ticket_id,
            title: row.title,
            description: row.description,
            priority: row.priority.parse()?,
            status: row.status.parse()?,
            machine_id: row.machine_id,
            scheduled_date: row.scheduled_date,
            assignee: Assignee::from_column(row.assigned_to),
            reported_by: row.reported_by,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = machines)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MachineRow {
    pub id: i64,
    pub machine_type: String,
    pub model: Option<String>,
}

impl From<MachineRow> for Machine {
    fn from(row: MachineRow) -> Self {
        Machine {
            id: row.id,
            machine_type: row.machine_type,
            model: row.model,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub role: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            full_name: row.full_name,
            role: Role::parse(&row.role),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = webhook_notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LedgerRow {
    pub id: i64,
    pub ticket_id: i64,
    pub notification_type: String,
    pub webhook_url: String,
    pub sent_at: DateTime<Utc>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub scheduled_date_notified: DateTime<Utc>,
    pub outcome_recorded_at: Option<DateTime<Utc>>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let outcome = row.outcome_recorded_at.map(|_| DeliveryOutcome {
            status: row.response_status,
            body: row.response_body.clone().unwrap_or_default(),
        });
        Ok(LedgerEntry {
            id: row.id,
            ticket_id: row.ticket_id,
            kind: row.notification_type.parse()?,
            target: row.webhook_url,
            sent_at: row.sent_at,
            due: row.scheduled_date_notified,
            outcome,
            outcome_recorded_at: row.outcome_recorded_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_notifications)]
pub struct NewLedgerRow<'a> {
    pub ticket_id: i64,
    pub notification_type: &'a str,
    pub webhook_url: &'a str,
    pub sent_at: DateTime<Utc>,
    pub scheduled_date_notified: DateTime<Utc>,
}

impl<'a> From<&'a LedgerClaim> for NewLedgerRow<'a> {
    fn from(claim: &'a LedgerClaim) -> Self {
        NewLedgerRow {
            ticket_id: claim.key.ticket_id,
            notification_type: claim.key.kind.as_str(),
            webhook_url: &claim.target,
            sent_at: claim.sent_at,
            scheduled_date_notified: claim.key.due,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = push_logs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PushLogRow {
    pub id: i64,
    pub user_id: i64,
    pub ticket_id: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PushLogRow> for PushLogEntry {
    type Error = StoreError;

    fn try_from(row: PushLogRow) -> Result<Self, Self::Error> {
        Ok(PushLogEntry {
            id: row.id,
            user_id: row.user_id,
            ticket_id: row.ticket_id,
            outcome: row.status.parse()?,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = push_logs)]
pub struct NewPushLogRow<'a> {
    pub user_id: i64,
    pub ticket_id: i64,
    pub status: &'a str,
    pub error_message: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl<'a> From<&'a NewPushLogEntry> for NewPushLogRow<'a> {
    fn from(entry: &'a NewPushLogEntry) -> Self {
        NewPushLogRow {
            user_id: entry.user_id,
            ticket_id: entry.ticket_id,
            status: entry.outcome.as_str(),
            error_message: entry.error_message.as_deref(),
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = push_subscriptions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SubscriptionRow {
    pub id: i64,
    pub user_id: i64,
    pub device_token: String,
    pub platform: String,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for DeviceSubscription {
    type Error = StoreError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(DeviceSubscription {
            id: row.id,
            user_id: row.user_id,
            device_token: row.device_token,
            platform: row.platform.parse()?,
            device_name: row.device_name,
            created_at: row.created_at,
            last_used: row.last_used,
        })
    }
}
