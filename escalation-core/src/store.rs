//! Datastore ports consumed by the escalation engine.
//!
//! Each trait covers one concern so that adapters stay narrow; [`Datastore`]
//! bundles them for the context object.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;

use crate::error::StoreResult;
use crate::types::{
    Assignee, DeliveryOutcome, DeviceSubscription, LedgerClaim, LedgerEntry, Machine,
    NewPushLogEntry, OverdueTicket, PushLogEntry, Ticket, TicketId, TicketStatus, User, UserId,
};

/// Selection of tickets whose planned execution time has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct OverdueQuery {
    /// Due timestamps strictly before this instant are late.
    pub before: DateTime<Utc>,
    pub statuses: Vec<TicketStatus>,
}

impl OverdueQuery {
    pub fn new(before: DateTime<Utc>) -> Self {
        Self {
            before,
            statuses: TicketStatus::ACTIONABLE.to_vec(),
        }
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        let due = match ticket.scheduled_date {
            Some(due) => due,
            None => return false,
        };
        ticket.assignee.is_some()
            && ticket.deleted_at.is_none()
            && self.statuses.contains(&ticket.status)
            && due < self.before
    }

    pub fn status_names(&self) -> Vec<&'static str> {
        self.statuses.iter().map(|s| s.as_str()).collect()
    }
}

/// Attaches machine descriptors and people names to matched tickets.
pub fn join_overdue(
    tickets: Vec<Ticket>,
    machines: &HashMap<i64, Machine>,
    people: &HashMap<UserId, User>,
) -> Vec<OverdueTicket> {
    tickets
        .into_iter()
        .map(|ticket| {
            let machine = ticket.machine_id.and_then(|id| machines.get(&id)).cloned();
            let assignee_name = match ticket.assignee {
                Some(Assignee::User(id)) => people.get(&id).map(User::display_name),
                _ => None,
            };
            let reporter_name = ticket
                .reported_by
                .and_then(|id| people.get(&id))
                .map(User::display_name);
            OverdueTicket {
                ticket,
                machine,
                assignee_name,
                reporter_name,
            }
        })
        .collect()
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Tickets matching `query`, joined with machine and people names.
    /// Ordering is by due timestamp ascending.
    async fn find_overdue(&self, query: &OverdueQuery) -> StoreResult<Vec<OverdueTicket>>;

    /// Every user holding the administrative role.
    async fn list_admins(&self) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Inserts the entry unless one exists for the same ticket, due value
    /// and kind. Returns the new entry id, or `None` when already present.
    async fn claim(&self, claim: &LedgerClaim) -> StoreResult<Option<i64>>;

    /// Stores the delivery outcome on a claimed entry. A second call for the
    /// same entry leaves the first outcome in place.
    async fn record_outcome(
        &self,
        entry_id: i64,
        outcome: &DeliveryOutcome,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Ledger entries of one ticket, newest first.
    async fn entries_for_ticket(&self, ticket: TicketId) -> StoreResult<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait PushLogStore: Send + Sync {
    /// Whether a push to `user` about `ticket` was logged after `since`.
    async fn has_recent_push(
        &self,
        user: UserId,
        ticket: TicketId,
        since: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn append_push_log(&self, entry: &NewPushLogEntry) -> StoreResult<()>;

    /// Push log rows of one ticket, newest first.
    async fn push_logs_for_ticket(&self, ticket: TicketId) -> StoreResult<Vec<PushLogEntry>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn active_subscriptions(
        &self,
        user: UserId,
        used_since: DateTime<Utc>,
    ) -> StoreResult<Vec<DeviceSubscription>>;

    async fn touch_subscription(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    async fn remove_subscription(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait RetentionStore: Send + Sync {
    /// Subscriptions last used before `cutoff`, oldest first.
    async fn idle_subscriptions(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<DeviceSubscription>>;

    async fn delete_idle_subscriptions(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn count_subscriptions(&self) -> StoreResult<u64>;

    /// Deletes planning entries dated strictly before `cutoff`.
    async fn delete_planning_before(&self, cutoff: NaiveDate) -> StoreResult<u64>;

    /// Deletes completed notes created strictly before `cutoff`.
    async fn delete_completed_notes_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Asks the storage engine to reclaim space and refresh statistics.
    async fn optimize(&self) -> StoreResult<()>;
}

/// Everything the engine needs from storage.
pub trait Datastore:
    TicketStore + NotificationLedger + PushLogStore + SubscriptionStore + RetentionStore
{
}

impl<T> Datastore for T where
    T: TicketStore + NotificationLedger + PushLogStore + SubscriptionStore + RetentionStore
{
}
