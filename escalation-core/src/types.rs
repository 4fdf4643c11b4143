use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

pub type TicketId = i64;
pub type UserId = i64;

/// Assignee value the ticket store uses for "whole team".
pub const TEAM_ASSIGNEE: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(StoreError::Decode(format!("unknown priority '{}'", other))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Received,
    Diagnostic,
    InProgress,
    WaitingParts,
    Completed,
    Archived,
    Cancelled,
}

impl TicketStatus {
    /// Statuses in which a late ticket still calls for escalation.
    pub const ACTIONABLE: [TicketStatus; 2] = [TicketStatus::Received, TicketStatus::Diagnostic];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Received => "received",
            TicketStatus::Diagnostic => "diagnostic",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::WaitingParts => "waiting_parts",
            TicketStatus::Completed => "completed",
            TicketStatus::Archived => "archived",
            TicketStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(TicketStatus::Received),
            "diagnostic" => Ok(TicketStatus::Diagnostic),
            "in_progress" => Ok(TicketStatus::InProgress),
            "waiting_parts" => Ok(TicketStatus::WaitingParts),
            "completed" => Ok(TicketStatus::Completed),
            "archived" => Ok(TicketStatus::Archived),
            "cancelled" => Ok(TicketStatus::Cancelled),
            other => Err(StoreError::Decode(format!("unknown ticket status '{}'", other))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a ticket is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Assignee {
    Team,
    User(UserId),
}

impl Assignee {
    pub fn from_column(value: Option<i64>) -> Option<Self> {
        match value {
            None => None,
            Some(TEAM_ASSIGNEE) => Some(Assignee::Team),
            Some(id) => Some(Assignee::User(id)),
        }
    }

    pub fn to_column(self) -> i64 {
        match self {
            Assignee::Team => TEAM_ASSIGNEE,
            Assignee::User(id) => id,
        }
    }

    pub fn user_id(self) -> Option<UserId> {
        match self {
            Assignee::Team => None,
            Assignee::User(id) => Some(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    /// Human-readable code such as `MX-042`.
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TicketStatus,
    pub machine_id: Option<i64>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub assignee: Option<Assignee>,
    pub reported_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: i64,
    pub machine_type: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Supervisor,
    Technician,
    Operator,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Technician => "technician",
            Role::Operator => "operator",
            Role::Other(role) => role,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "supervisor" => Role::Supervisor,
            "technician" => Role::Technician,
            "operator" => Role::Operator,
            other => Role::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub role: Role,
}

impl User {
    /// Full name when recorded, otherwise first and last name joined.
    pub fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return full.to_string();
        }
        match self.last_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

/// An overdue ticket joined with what the escalation payload needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverdueTicket {
    pub ticket: Ticket,
    pub machine: Option<Machine>,
    pub assignee_name: Option<String>,
    pub reporter_name: Option<String>,
}

impl OverdueTicket {
    pub fn due(&self) -> Option<DateTime<Utc>> {
        self.ticket.scheduled_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OverdueEscalation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::OverdueEscalation => "overdue_escalation",
        }
    }
}

impl FromStr for NotificationKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overdue_escalation" => Ok(NotificationKind::OverdueEscalation),
            other => Err(StoreError::Decode(format!("unknown notification kind '{}'", other))),
        }
    }
}

/// Identifies the condition a ledger entry was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub ticket_id: TicketId,
    pub due: DateTime<Utc>,
    pub kind: NotificationKind,
}

/// Insert half of a ledger entry, written before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerClaim {
    pub key: LedgerKey,
    pub target: String,
    pub sent_at: DateTime<Utc>,
}

/// What the Callback Channel answered, or why it could not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub status: Option<i32>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub ticket_id: TicketId,
    pub kind: NotificationKind,
    pub target: String,
    pub sent_at: DateTime<Utc>,
    pub due: DateTime<Utc>,
    pub outcome: Option<DeliveryOutcome>,
    pub outcome_recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushOutcome {
    Success,
    Failed,
    Error,
}

impl PushOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushOutcome::Success => "success",
            PushOutcome::Failed => "failed",
            PushOutcome::Error => "error",
        }
    }
}

impl FromStr for PushOutcome {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(PushOutcome::Success),
            "failed" => Ok(PushOutcome::Failed),
            "error" => Ok(PushOutcome::Error),
            other => Err(StoreError::Decode(format!("unknown push outcome '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPushLogEntry {
    pub user_id: UserId,
    pub ticket_id: TicketId,
    pub outcome: PushOutcome,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushLogEntry {
    pub id: i64,
    pub user_id: UserId,
    pub ticket_id: TicketId,
    pub outcome: PushOutcome,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePlatform {
    Ios,
    Android,
}

impl DevicePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevicePlatform::Ios => "ios",
            DevicePlatform::Android => "android",
        }
    }
}

impl FromStr for DevicePlatform {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(DevicePlatform::Ios),
            "android" => Ok(DevicePlatform::Android),
            other => Err(StoreError::Decode(format!("unknown device platform '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSubscription {
    pub id: i64,
    pub user_id: UserId,
    pub device_token: String,
    pub platform: DevicePlatform,
    pub device_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningEntry {
    pub id: i64,
    pub date: NaiveDate,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub text: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignee_sentinel() {
        assert_eq!(Assignee::from_column(None), None);
        assert_eq!(Assignee::from_column(Some(0)), Some(Assignee::Team));
        assert_eq!(Assignee::from_column(Some(5)), Some(Assignee::User(5)));
        assert_eq!(Assignee::Team.user_id(), None);
        assert_eq!(Assignee::User(5).to_column(), 5);
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            TicketStatus::Received,
            TicketStatus::InProgress,
            TicketStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TicketStatus>().unwrap(), status);
        }
        assert!("done".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_display_name_prefers_full_name() {
        let mut user = User {
            id: 1,
            first_name: "Marc".to_string(),
            last_name: Some("Tremblay".to_string()),
            full_name: Some("Marc-André Tremblay".to_string()),
            role: Role::Technician,
        };
        assert_eq!(user.display_name(), "Marc-André Tremblay");

        user.full_name = Some("  ".to_string());
        assert_eq!(user.display_name(), "Marc Tremblay");

        user.last_name = None;
        assert_eq!(user.display_name(), "Marc");
    }
}
