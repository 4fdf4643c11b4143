use chrono::{DateTime, Utc};
use escalation_core::error::StoreResult;
use escalation_core::store::{OverdueQuery, TicketStore};
use escalation_core::types::OverdueTicket;

/// Returns actionable tickets whose due time is before `now`, earliest first.
pub async fn detect_overdue<S: TicketStore + ?Sized>(
    store: &S,
    now: DateTime<Utc>,
) -> StoreResult<Vec<OverdueTicket>> {
    let query = OverdueQuery::new(now);
    let mut found = store.find_overdue(&query).await?;
    found.sort_by_key(|item| (item.due(), item.ticket.id));

    tracing::info!(count = found.len(), "Overdue tickets detected");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ticket, TestWorld};
    use chrono::Duration;
    use escalation_core::types::{Assignee, TicketStatus};

    #[tokio::test]
    async fn test_detects_each_overdue_ticket_once() {
        let world = TestWorld::new();
        let now = world.now;

        world.add_ticket(ticket(1, "MX-001", now - Duration::hours(3), Some(Assignee::User(5))));
        world.add_ticket(ticket(2, "MX-002", now - Duration::hours(5), Some(Assignee::Team)));
        let mut diagnostic = ticket(3, "MX-003", now - Duration::minutes(1), Some(Assignee::User(6)));
        diagnostic.status = TicketStatus::Diagnostic;
        world.add_ticket(diagnostic);

        let mut in_progress = ticket(4, "MX-004", now - Duration::hours(1), Some(Assignee::User(5)));
        in_progress.status = TicketStatus::InProgress;
        world.add_ticket(in_progress);
        world.add_ticket(ticket(5, "MX-005", now - Duration::hours(1), None));
        world.add_ticket(ticket(6, "MX-006", now + Duration::hours(1), Some(Assignee::User(5))));
        let mut unscheduled = ticket(7, "MX-007", now, Some(Assignee::User(5)));
        unscheduled.scheduled_date = None;
        world.add_ticket(unscheduled);
        let mut deleted = ticket(8, "MX-008", now - Duration::hours(1), Some(Assignee::User(5)));
        deleted.deleted_at = Some(now - Duration::minutes(30));
        world.add_ticket(deleted);

        let found = detect_overdue(world.store.as_ref(), now).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|t| t.ticket.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn test_ties_are_ordered_by_ticket_id() {
        let world = TestWorld::new();
        let due = world.now - Duration::hours(2);
        world.add_ticket(ticket(9, "MX-009", due, Some(Assignee::User(5))));
        world.add_ticket(ticket(4, "MX-004", due, Some(Assignee::User(5))));

        let found = detect_overdue(world.store.as_ref(), world.now).await.unwrap();
        let ids: Vec<i64> = found.iter().map(|t| t.ticket.id).collect();
        assert_eq!(ids, vec![4, 9]);
    }
}
