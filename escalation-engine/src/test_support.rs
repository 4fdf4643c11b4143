//! Fixtures and fake channels shared by the engine tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use escalation_core::channel::{
    CallbackChannel, CallbackPayload, CallbackResponse, PushChannel, PushNotification, PushReport,
};
use escalation_core::config::{CallbackConfig, Config};
use escalation_core::error::DeliveryError;
use escalation_core::memory_store::MemoryStore;
use escalation_core::types::{Assignee, Priority, Role, Ticket, TicketStatus, User, UserId};
use escalation_core::EscalationContext;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CALLBACK_URL: &str = "https://hooks.example.test/escalate";

pub fn config(callback_url: Option<&str>) -> Config {
    Config {
        callback: CallbackConfig {
            url: callback_url.map(str::to_string),
            timeout_secs: 5,
            ticket_delay_ms: 0,
        },
        ..Config::default()
    }
}

pub fn ticket(id: i64, code: &str, due: DateTime<Utc>, assignee: Option<Assignee>) -> Ticket {
    Ticket {
        id,
        code: code.to_string(),
        title: "Hydraulic leak".to_string(),
        description: Some("Oil under the main cylinder".to_string()),
        priority: Priority::High,
        status: TicketStatus::Received,
        machine_id: None,
        scheduled_date: Some(due),
        assignee,
        reported_by: None,
        created_at: due - chrono::Duration::days(2),
        deleted_at: None,
    }
}

pub fn user(id: UserId, first_name: &str, role: Role) -> User {
    User {
        id,
        first_name: first_name.to_string(),
        last_name: None,
        full_name: None,
        role,
    }
}

/// Records every post and answers from a script, then with 200 "ok".
pub struct FakeCallback {
    target: Option<String>,
    answers: Mutex<VecDeque<Result<CallbackResponse, DeliveryError>>>,
    posts: Mutex<Vec<CallbackPayload>>,
}

impl FakeCallback {
    pub fn new(target: Option<&str>) -> Self {
        Self {
            target: target.map(str::to_string),
            answers: Mutex::new(VecDeque::new()),
            posts: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(&self, answer: Result<CallbackResponse, DeliveryError>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn posts(&self) -> Vec<CallbackPayload> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackChannel for FakeCallback {
    fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    async fn post(&self, payload: &CallbackPayload) -> Result<CallbackResponse, DeliveryError> {
        self.posts.lock().unwrap().push(payload.clone());
        self.answers.lock().unwrap().pop_front().unwrap_or(Ok(CallbackResponse {
            status: 200,
            body: "ok".to_string(),
        }))
    }
}

/// Records sends per user. Users marked failing get a transport error,
/// users without devices get an unsuccessful report.
#[derive(Default)]
pub struct FakePush {
    sends: Mutex<Vec<(UserId, PushNotification)>>,
    failing: Mutex<HashSet<UserId>>,
    deviceless: Mutex<HashSet<UserId>>,
    delay: Mutex<Option<Duration>>,
}

impl FakePush {
    pub fn fail_for(&self, user: UserId) {
        self.failing.lock().unwrap().insert(user);
    }

    pub fn no_devices_for(&self, user: UserId) {
        self.deviceless.lock().unwrap().insert(user);
    }

    /// Makes every send take `delay` before answering.
    pub fn delay_sends(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn sends(&self) -> Vec<(UserId, PushNotification)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<UserId> {
        self.sends().into_iter().map(|(user, _)| user).collect()
    }
}

#[async_trait]
impl PushChannel for FakePush {
    async fn send_to_user(
        &self,
        user: UserId,
        notification: &PushNotification,
    ) -> Result<PushReport, DeliveryError> {
        self.sends.lock().unwrap().push((user, notification.clone()));
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&user) {
            return Err(DeliveryError::Transport("push service unreachable".to_string()));
        }
        if self.deviceless.lock().unwrap().contains(&user) {
            return Ok(PushReport::default());
        }
        Ok(PushReport::from_counts(1, 0))
    }
}

/// A memory store plus fake channels around a fixed "now".
pub struct TestWorld {
    pub now: DateTime<Utc>,
    pub store: Arc<MemoryStore>,
    pub callback: Arc<FakeCallback>,
    pub push: Arc<FakePush>,
    callback_url: Option<&'static str>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::with_callback(Some(CALLBACK_URL))
    }

    pub fn with_callback(callback_url: Option<&'static str>) -> Self {
        Self {
            now: Utc::now(),
            store: Arc::new(MemoryStore::new()),
            callback: Arc::new(FakeCallback::new(callback_url)),
            push: Arc::new(FakePush::default()),
            callback_url,
        }
    }

    pub fn context(&self) -> EscalationContext {
        EscalationContext::new(
            config(self.callback_url),
            self.store.clone(),
            self.callback.clone(),
            self.push.clone(),
        )
    }

    pub fn add_ticket(&self, ticket: Ticket) {
        self.store.insert_ticket(ticket).unwrap();
    }

    pub fn add_user(&self, id: UserId, first_name: &str, role: Role) {
        self.store.insert_user(user(id, first_name, role)).unwrap();
    }
}
