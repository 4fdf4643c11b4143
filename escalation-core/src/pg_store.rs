use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{DbConnection, DbPool};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    LedgerRow, MachineRow, NewLedgerRow, NewPushLogRow, PushLogRow, SubscriptionRow, TicketRow,
    UserRow,
};
use crate::schema::{
    machines, planner_notes, planning_events, push_logs, push_subscriptions, tickets, users,
    webhook_notifications,
};
use crate::store::{
    join_overdue, NotificationLedger, OverdueQuery, PushLogStore, RetentionStore,
    SubscriptionStore, TicketStore,
};
use crate::types::{
    DeliveryOutcome, DeviceSubscription, LedgerClaim, LedgerEntry, Machine, NewPushLogEntry,
    OverdueTicket, PushLogEntry, Ticket, TicketId, User, UserId,
};

/// Tables compacted by [`RetentionStore::optimize`].
const OPTIMIZE_SQL: &str = "VACUUM (ANALYZE) push_subscriptions, planning_events, planner_notes";

/// Datastore backed by the shared Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<DbConnection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

fn decode_subscriptions(rows: Vec<SubscriptionRow>) -> Vec<DeviceSubscription> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id;
            match DeviceSubscription::try_from(row) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!(subscription = id, "Skipping undecodable subscription: {}", e);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl TicketStore for PgStore {
    async fn find_overdue(&self, query: &OverdueQuery) -> StoreResult<Vec<OverdueTicket>> {
        let mut conn = self.conn().await?;

        let rows: Vec<TicketRow> = tickets::table
            .filter(tickets::assigned_to.is_not_null())
            .filter(tickets::scheduled_date.is_not_null())
            .filter(tickets::scheduled_date.lt(query.before))
            .filter(tickets::status.eq_any(query.status_names()))
            .filter(tickets::deleted_at.is_null())
            .order((tickets::scheduled_date.asc(), tickets::id.asc()))
            .select(TicketRow::as_select())
            .load(&mut conn)
            .await?;

        let found: Vec<Ticket> = rows
            .into_iter()
            .filter_map(|row| {
                let code = row.ticket_id.clone();
                match Ticket::try_from(row) {
                    Ok(ticket) => Some(ticket),
                    Err(e) => {
                        tracing::warn!(ticket = %code, "Skipping undecodable ticket: {}", e);
                        None
                    }
                }
            })
            .collect();

        if found.is_empty() {
            return Ok(Vec::new());
        }

        let machine_ids: Vec<i64> = found.iter().filter_map(|t| t.machine_id).collect();
        let user_ids: Vec<i64> = found
            .iter()
            .flat_map(|t| [t.assignee.and_then(|a| a.user_id()), t.reported_by])
            .flatten()
            .collect();

        let machines: HashMap<i64, Machine> = if machine_ids.is_empty() {
            HashMap::new()
        } else {
            machines::table
                .filter(machines::id.eq_any(machine_ids))
                .select(MachineRow::as_select())
                .load(&mut conn)
                .await?
                .into_iter()
                .map(|row| (row.id, Machine::from(row)))
                .collect()
        };

        let people: HashMap<i64, User> = if user_ids.is_empty() {
            HashMap::new()
        } else {
            users::table
                .filter(users::id.eq_any(user_ids))
                .select(UserRow::as_select())
                .load(&mut conn)
                .await?
                .into_iter()
                .map(|row| (row.id, User::from(row)))
                .collect()
        };

        Ok(join_overdue(found, &machines, &people))
    }

    async fn list_admins(&self) -> StoreResult<Vec<User>> {
        let mut conn = self.conn().await?;
        let rows: Vec<UserRow> = users::table
            .filter(users::role.eq("admin"))
            .order(users::id.asc())
            .select(UserRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[async_trait]
impl NotificationLedger for PgStore {
    async fn claim(&self, claim: &LedgerClaim) -> StoreResult<Option<i64>> {
        let mut conn = self.conn().await?;
        let row = NewLedgerRow::from(claim);

        let id = diesel::insert_into(webhook_notifications::table)
            .values(&row)
            .on_conflict((
                webhook_notifications::ticket_id,
                webhook_notifications::scheduled_date_notified,
                webhook_notifications::notification_type,
            ))
            .do_nothing()
            .returning(webhook_notifications::id)
            .get_result::<i64>(&mut conn)
            .await
            .optional()?;

        Ok(id)
    }

    async fn record_outcome(
        &self,
        entry_id: i64,
        outcome: &DeliveryOutcome,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            webhook_notifications::table
                .filter(webhook_notifications::id.eq(entry_id))
                .filter(webhook_notifications::outcome_recorded_at.is_null()),
        )
        .set((
            webhook_notifications::response_status.eq(outcome.status),
            webhook_notifications::response_body.eq(Some(outcome.body.as_str())),
            webhook_notifications::outcome_recorded_at.eq(Some(recorded_at)),
        ))
        .execute(&mut conn)
        .await?;

        if updated == 0 {
            tracing::warn!(entry = entry_id, "Ledger entry already carries an outcome");
        }
        Ok(())
    }

    async fn entries_for_ticket(&self, ticket: TicketId) -> StoreResult<Vec<LedgerEntry>> {
        let mut conn = self.conn().await?;
        let rows: Vec<LedgerRow> = webhook_notifications::table
            .filter(webhook_notifications::ticket_id.eq(ticket))
            .order((webhook_notifications::sent_at.desc(), webhook_notifications::id.desc()))
            .select(LedgerRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}

#[async_trait]
impl PushLogStore for PgStore {
    async fn has_recent_push(
        &self,
        user: UserId,
        ticket: TicketId,
        since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let found = diesel::select(diesel::dsl::exists(
            push_logs::table
                .filter(push_logs::user_id.eq(user))
                .filter(push_logs::ticket_id.eq(ticket))
                .filter(push_logs::created_at.gt(since)),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(found)
    }

    async fn append_push_log(&self, entry: &NewPushLogEntry) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::insert_into(push_logs::table)
            .values(NewPushLogRow::from(entry))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn push_logs_for_ticket(&self, ticket: TicketId) -> StoreResult<Vec<PushLogEntry>> {
        let mut conn = self.conn().await?;
        let rows: Vec<PushLogRow> = push_logs::table
            .filter(push_logs::ticket_id.eq(ticket))
            .order((push_logs::created_at.desc(), push_logs::id.desc()))
            .select(PushLogRow::as_select())
            .load(&mut conn)
            .await?;
        rows.into_iter().map(PushLogEntry::try_from).collect()
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn active_subscriptions(
        &self,
        user: UserId,
        used_since: DateTime<Utc>,
    ) -> StoreResult<Vec<DeviceSubscription>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SubscriptionRow> = push_subscriptions::table
            .filter(push_subscriptions::user_id.eq(user))
            .filter(push_subscriptions::last_used.gt(used_since))
            .order(push_subscriptions::id.asc())
            .select(SubscriptionRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(decode_subscriptions(rows))
    }

    async fn touch_subscription(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::update(push_subscriptions::table.filter(push_subscriptions::id.eq(id)))
            .set(push_subscriptions::last_used.eq(at))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_subscription(&self, id: i64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::delete(push_subscriptions::table.filter(push_subscriptions::id.eq(id)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RetentionStore for PgStore {
    async fn idle_subscriptions(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<DeviceSubscription>> {
        let mut conn = self.conn().await?;
        let rows: Vec<SubscriptionRow> = push_subscriptions::table
            .filter(push_subscriptions::last_used.lt(cutoff))
            .order(push_subscriptions::last_used.asc())
            .select(SubscriptionRow::as_select())
            .load(&mut conn)
            .await?;
        Ok(decode_subscriptions(rows))
    }

    async fn delete_idle_subscriptions(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            push_subscriptions::table.filter(push_subscriptions::last_used.lt(cutoff)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted as u64)
    }

    async fn count_subscriptions(&self) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let count: i64 = push_subscriptions::table
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_planning_before(&self, cutoff: NaiveDate) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(planning_events::table.filter(planning_events::date.lt(cutoff)))
            .execute(&mut conn)
            .await?;
        Ok(deleted as u64)
    }

    async fn delete_completed_notes_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            planner_notes::table
                .filter(planner_notes::done.eq(true))
                .filter(planner_notes::created_at.lt(cutoff)),
        )
        .execute(&mut conn)
        .await?;
        Ok(deleted as u64)
    }

    async fn optimize(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        diesel::sql_query(OPTIMIZE_SQL).execute(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::{create_pool, run_migrations};
    use crate::types::{LedgerKey, NotificationKind, PushOutcome};
    use chrono::{Duration, TimeZone};

    async fn store() -> PgStore {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database"),
            ..DatabaseConfig::default()
        };
        run_migrations(&config).await.unwrap();
        PgStore::new(create_pool(&config).await.unwrap())
    }

    async fn insert_ticket(store: &PgStore) -> TicketId {
        let code = format!("PG-{}", Utc::now().timestamp_micros());
        let mut conn = store.conn().await.unwrap();
        diesel::insert_into(tickets::table)
            .values((tickets::ticket_id.eq(code), tickets::title.eq("Hydraulic leak")))
            .returning(tickets::id)
            .get_result(&mut conn)
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn test_claim_is_unique_and_outcome_written_once() {
        let store = store().await;
        let ticket = insert_ticket(&store).await;
        let due = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        let claim = LedgerClaim {
            key: LedgerKey {
                ticket_id: ticket,
                due,
                kind: NotificationKind::OverdueEscalation,
            },
            target: "https://hooks.example.test/escalate".to_string(),
            sent_at: due + Duration::hours(1),
        };

        let id = store.claim(&claim).await.unwrap().unwrap();
        assert_eq!(store.claim(&claim).await.unwrap(), None);

        let delivered = DeliveryOutcome {
            status: Some(200),
            body: "ok".to_string(),
        };
        let late = DeliveryOutcome {
            status: Some(500),
            body: "late".to_string(),
        };
        store.record_outcome(id, &delivered, due).await.unwrap();
        store.record_outcome(id, &late, due).await.unwrap();

        let entries = store.entries_for_ticket(ticket).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].outcome, Some(delivered));

        let rescheduled = LedgerClaim {
            key: LedgerKey {
                due: due + Duration::days(1),
                ..claim.key
            },
            ..claim.clone()
        };
        assert!(store.claim(&rescheduled).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "needs a Postgres database in DATABASE_URL"]
    async fn test_push_window_and_optimize() {
        let store = store().await;
        let ticket = insert_ticket(&store).await;
        let at = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();
        store
            .append_push_log(&NewPushLogEntry {
                user_id: 3,
                ticket_id: ticket,
                outcome: PushOutcome::Success,
                error_message: None,
                created_at: at,
            })
            .await
            .unwrap();

        assert!(store.has_recent_push(3, ticket, at - Duration::seconds(1)).await.unwrap());
        assert!(!store.has_recent_push(3, ticket, at).await.unwrap());
        assert_eq!(store.push_logs_for_ticket(ticket).await.unwrap().len(), 1);

        store.optimize().await.unwrap();
    }
}
