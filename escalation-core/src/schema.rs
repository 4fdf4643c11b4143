use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    users (id) {
        id -> BigInt,
        first_name -> Text,
        last_name -> Nullable<Text>,
        full_name -> Nullable<Text>,
        role -> Text,
    }
}

table! {
    machines (id) {
        id -> BigInt,
        machine_type -> Text,
        model -> Nullable<Text>,
    }
}

table! {
    tickets (id) {
        id -> BigInt,
        ticket_id -> Text,
        title -> Text,
        description -> Nullable<Text>,
        priority -> Text,
        status -> Text,
        machine_id -> Nullable<BigInt>,
        scheduled_date -> Nullable<Timestamptz>,
        assigned_to -> Nullable<BigInt>,
        reported_by -> Nullable<BigInt>,
        created_at -> Timestamptz,
        deleted_at -> Nullable<Timestamptz>,
    }
}

table! {
    webhook_notifications (id) {
        id -> BigInt,
        ticket_id -> BigInt,
        notification_type -> Text,
        webhook_url -> Text,
        sent_at -> Timestamptz,
        response_status -> Nullable<Integer>,
        response_body -> Nullable<Text>,
        scheduled_date_notified -> Timestamptz,
        outcome_recorded_at -> Nullable<Timestamptz>,
    }
}

table! {
    push_logs (id) {
        id -> BigInt,
        user_id -> BigInt,
        ticket_id -> BigInt,
        status -> Text,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    push_subscriptions (id) {
        id -> BigInt,
        user_id -> BigInt,
        device_token -> Text,
        platform -> Text,
        device_name -> Nullable<Text>,
        created_at -> Timestamptz,
        last_used -> Timestamptz,
    }
}

table! {
    planning_events (id) {
        id -> BigInt,
        date -> Date,
        title -> Text,
    }
}

table! {
    planner_notes (id) {
        id -> BigInt,
        text -> Text,
        done -> Bool,
        created_at -> Timestamptz,
    }
}

joinable!(webhook_notifications -> tickets (ticket_id));
joinable!(push_logs -> tickets (ticket_id));
joinable!(push_logs -> users (user_id));
joinable!(push_subscriptions -> users (user_id));

allow_tables_to_appear_in_same_query!(
    users,
    machines,
    tickets,
    webhook_notifications,
    push_logs,
    push_subscriptions,
    planning_events,
    planner_notes,
);
