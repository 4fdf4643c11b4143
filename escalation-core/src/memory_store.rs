//! In-memory datastore for engine tests and local harnesses.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{StoreError, StoreResult};
use crate::store::{
    join_overdue, NotificationLedger, OverdueQuery, PushLogStore, RetentionStore,
    SubscriptionStore, TicketStore,
};
use crate::types::{
    DeliveryOutcome, DeviceSubscription, LedgerClaim, LedgerEntry, LedgerKey, Machine,
    NewPushLogEntry, Note, OverdueTicket, PlanningEntry, PushLogEntry, Role, Ticket, TicketId,
    User, UserId,
};

/// Store operations that can be made to fail on demand.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    FindOverdue,
    ListAdmins,
    Claim,
    AppendPushLog,
    IdleSubscriptions,
    DeletePlanning,
    DeleteNotes,
    Optimize,
}

/// Returns early with an injected error when `$point` is set to fail.
#[cfg(any(test, feature = "test-util"))]
macro_rules! fail_point {
    ($state:expr, $point:ident) => {
        $state.check(FailPoint::$point)?
    };
}

#[cfg(not(any(test, feature = "test-util")))]
macro_rules! fail_point {
    ($state:expr, $point:ident) => {};
}

#[derive(Debug, Default)]
struct MemoryState {
    tickets: HashMap<TicketId, Ticket>,
    machines: HashMap<i64, Machine>,
    users: HashMap<UserId, User>,
    ledger: Vec<LedgerEntry>,
    ledger_keys: HashSet<LedgerKey>,
    push_logs: Vec<PushLogEntry>,
    subscriptions: HashMap<i64, DeviceSubscription>,
    planning: HashMap<i64, PlanningEntry>,
    notes: HashMap<i64, Note>,
    #[cfg(any(test, feature = "test-util"))]
    failing: HashSet<FailPoint>,
    next_id: i64,
}

impl MemoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    #[cfg(any(test, feature = "test-util"))]
    fn check(&self, point: FailPoint) -> StoreResult<()> {
        if self.failing.contains(&point) {
            return Err(StoreError::Unavailable(format!("{:?} failure injected", point)));
        }
        Ok(())
    }
}

/// Thread-safe datastore keeping every table in memory.
///
/// The ledger enforces the same uniqueness on (ticket, due, kind) as the
/// Postgres index, so claims behave identically.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, MemoryState>> {
        self.state
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    pub fn insert_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        self.write()?.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    /// Replaces a stored ticket through `edit`, as an external writer would.
    pub fn update_ticket(&self, id: TicketId, edit: impl FnOnce(&mut Ticket)) -> StoreResult<()> {
        let mut state = self.write()?;
        let ticket = state
            .tickets
            .get_mut(&id)
            .ok_or_else(|| StoreError::Unavailable(format!("no ticket {}", id)))?;
        edit(ticket);
        Ok(())
    }

    pub fn insert_machine(&self, machine: Machine) -> StoreResult<()> {
        self.write()?.machines.insert(machine.id, machine);
        Ok(())
    }

    pub fn insert_user(&self, user: User) -> StoreResult<()> {
        self.write()?.users.insert(user.id, user);
        Ok(())
    }

    pub fn insert_subscription(&self, subscription: DeviceSubscription) -> StoreResult<()> {
        self.write()?
            .subscriptions
            .insert(subscription.id, subscription);
        Ok(())
    }

    pub fn insert_planning(&self, entry: PlanningEntry) -> StoreResult<()> {
        self.write()?.planning.insert(entry.id, entry);
        Ok(())
    }

    pub fn insert_note(&self, note: Note) -> StoreResult<()> {
        self.write()?.notes.insert(note.id, note);
        Ok(())
    }

    /// Makes every later call of `point` fail until [`MemoryStore::heal`].
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail(&self, point: FailPoint) -> StoreResult<()> {
        self.write()?.failing.insert(point);
        Ok(())
    }

    #[cfg(any(test, feature = "test-util"))]
    pub fn heal(&self, point: FailPoint) -> StoreResult<()> {
        self.write()?.failing.remove(&point);
        Ok(())
    }

    /// All ledger entries in insertion order.
    pub fn ledger_entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        Ok(self.read()?.ledger.clone())
    }

    /// All push log rows in insertion order.
    pub fn push_logs(&self) -> StoreResult<Vec<PushLogEntry>> {
        Ok(self.read()?.push_logs.clone())
    }

    pub fn subscriptions(&self) -> StoreResult<Vec<DeviceSubscription>> {
        let mut subs: Vec<_> = self.read()?.subscriptions.values().cloned().collect();
        subs.sort_by_key(|s| s.id);
        Ok(subs)
    }

    pub fn planning(&self) -> StoreResult<Vec<PlanningEntry>> {
        let mut entries: Vec<_> = self.read()?.planning.values().cloned().collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    pub fn notes(&self) -> StoreResult<Vec<Note>> {
        let mut notes: Vec<_> = self.read()?.notes.values().cloned().collect();
        notes.sort_by_key(|n| n.id);
        Ok(notes)
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn find_overdue(&self, query: &OverdueQuery) -> StoreResult<Vec<OverdueTicket>> {
        let state = self.read()?;
        fail_point!(state, FindOverdue);

        let mut found: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.scheduled_date, t.id));

        Ok(join_overdue(found, &state.machines, &state.users))
    }

    async fn list_admins(&self) -> StoreResult<Vec<User>> {
        let state = self.read()?;
        fail_point!(state, ListAdmins);

        let mut admins: Vec<User> = state
            .users
            .values()
            .filter(|u| u.role == Role::Admin)
            .cloned()
            .collect();
        admins.sort_by_key(|u| u.id);
        Ok(admins)
    }
}

#[async_trait]
impl NotificationLedger for MemoryStore {
    async fn claim(&self, claim: &LedgerClaim) -> StoreResult<Option<i64>> {
        let mut state = self.write()?;
        fail_point!(state, Claim);

        if !state.ledger_keys.insert(claim.key) {
            return Ok(None);
        }
        let id = state.allocate_id();
        state.ledger.push(LedgerEntry {
            id,
            ticket_id: claim.key.ticket_id,
            kind: claim.key.kind,
            target: claim.target.clone(),
            sent_at: claim.sent_at,
            due: claim.key.due,
            outcome: None,
            outcome_recorded_at: None,
        });
        Ok(Some(id))
    }

    async fn record_outcome(
        &self,
        entry_id: i64,
        outcome: &DeliveryOutcome,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        if let Some(entry) = state
            .ledger
            .iter_mut()
            .find(|e| e.id == entry_id && e.outcome_recorded_at.is_none())
        {
            entry.outcome = Some(outcome.clone());
            entry.outcome_recorded_at = Some(recorded_at);
        }
        Ok(())
    }

    async fn entries_for_ticket(&self, ticket: TicketId) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.read()?;
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.ticket_id == ticket)
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.sent_at, b.id).cmp(&(a.sent_at, a.id)));
        Ok(entries)
    }
}

#[async_trait]
impl PushLogStore for MemoryStore {
    async fn has_recent_push(
        &self,
        user: UserId,
        ticket: TicketId,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let state = self.read()?;
        Ok(state
            .push_logs
            .iter()
            .any(|l| l.user_id == user && l.ticket_id == ticket && l.created_at > since))
    }

    async fn append_push_log(&self, entry: &NewPushLogEntry) -> StoreResult<()> {
        let mut state = self.write()?;
        fail_point!(state, AppendPushLog);

        let id = state.allocate_id();
        state.push_logs.push(PushLogEntry {
            id,
            user_id: entry.user_id,
            ticket_id: entry.ticket_id,
            outcome: entry.outcome,
            error_message: entry.error_message.clone(),
            created_at: entry.created_at,
        });
        Ok(())
    }

    async fn push_logs_for_ticket(&self, ticket: TicketId) -> StoreResult<Vec<PushLogEntry>> {
        let state = self.read()?;
        let mut logs: Vec<PushLogEntry> = state
            .push_logs
            .iter()
            .filter(|l| l.ticket_id == ticket)
            .cloned()
            .collect();
        logs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(logs)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn active_subscriptions(
        &self,
        user: UserId,
        used_since: DateTime<Utc>,
    ) -> StoreResult<Vec<DeviceSubscription>> {
        let state = self.read()?;
        let mut subs: Vec<DeviceSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user && s.last_used > used_since)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        Ok(subs)
    }

    async fn touch_subscription(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(sub) = self.write()?.subscriptions.get_mut(&id) {
            sub.last_used = at;
        }
        Ok(())
    }

    async fn remove_subscription(&self, id: i64) -> StoreResult<()> {
        self.write()?.subscriptions.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl RetentionStore for MemoryStore {
    async fn idle_subscriptions(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<DeviceSubscription>> {
        let state = self.read()?;
        fail_point!(state, IdleSubscriptions);

        let mut idle: Vec<DeviceSubscription> = state
            .subscriptions
            .values()
            .filter(|s| s.last_used < cutoff)
            .cloned()
            .collect();
        idle.sort_by_key(|s| (s.last_used, s.id));
        Ok(idle)
    }

    async fn delete_idle_subscriptions(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.write()?;
        fail_point!(state, IdleSubscriptions);

        let before = state.subscriptions.len();
        state.subscriptions.retain(|_, s| s.last_used >= cutoff);
        Ok((before - state.subscriptions.len()) as u64)
    }

    async fn count_subscriptions(&self) -> StoreResult<u64> {
        Ok(self.read()?.subscriptions.len() as u64)
    }

    async fn delete_planning_before(&self, cutoff: NaiveDate) -> StoreResult<u64> {
        let mut state = self.write()?;
        fail_point!(state, DeletePlanning);

        let before = state.planning.len();
        state.planning.retain(|_, e| e.date >= cutoff);
        Ok((before - state.planning.len()) as u64)
    }

    async fn delete_completed_notes_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.write()?;
        fail_point!(state, DeleteNotes);

        let before = state.notes.len();
        state.notes.retain(|_, n| !(n.done && n.created_at < cutoff));
        Ok((before - state.notes.len()) as u64)
    }

    async fn optimize(&self) -> StoreResult<()> {
        let _state = self.read()?;
        fail_point!(_state, Optimize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationKind, PushOutcome};
    use chrono::{Duration, TimeZone};

    fn claim(ticket_id: TicketId, due: DateTime<Utc>) -> LedgerClaim {
        LedgerClaim {
            key: LedgerKey {
                ticket_id,
                due,
                kind: NotificationKind::OverdueEscalation,
            },
            target: "https://hooks.example.test/escalate".to_string(),
            sent_at: due + Duration::hours(1),
        }
    }

    #[tokio::test]
    async fn test_claim_is_unique_per_key() {
        let store = MemoryStore::new();
        let due = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

        let first = store.claim(&claim(7, due)).await.unwrap();
        assert!(first.is_some());
        assert_eq!(store.claim(&claim(7, due)).await.unwrap(), None);

        let moved = due + Duration::days(1);
        assert!(store.claim(&claim(7, moved)).await.unwrap().is_some());
        assert_eq!(store.ledger_entries().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_outcome_is_written_once() {
        let store = MemoryStore::new();
        let due = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let id = store.claim(&claim(7, due)).await.unwrap().unwrap();

        let ok = DeliveryOutcome { status: Some(200), body: "ok".to_string() };
        let late = DeliveryOutcome { status: Some(500), body: "late".to_string() };
        store.record_outcome(id, &ok, due).await.unwrap();
        store.record_outcome(id, &late, due).await.unwrap();

        let entries = store.entries_for_ticket(7).await.unwrap();
        assert_eq!(entries[0].outcome, Some(ok));
    }

    #[tokio::test]
    async fn test_recent_push_window_is_exclusive() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        store
            .append_push_log(&NewPushLogEntry {
                user_id: 3,
                ticket_id: 9,
                outcome: PushOutcome::Success,
                error_message: None,
                created_at: at,
            })
            .await
            .unwrap();

        assert!(store.has_recent_push(3, 9, at - Duration::seconds(1)).await.unwrap());
        assert!(!store.has_recent_push(3, 9, at).await.unwrap());
        assert!(!store.has_recent_push(4, 9, at - Duration::hours(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_point_injection() {
        let store = MemoryStore::new();
        store.fail(FailPoint::ListAdmins).unwrap();
        assert!(matches!(
            store.list_admins().await,
            Err(StoreError::Unavailable(_))
        ));
        store.heal(FailPoint::ListAdmins).unwrap();
        assert!(store.list_admins().await.unwrap().is_empty());
    }
}
