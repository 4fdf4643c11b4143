//! Scheduler entry point: the `Task` interface, the escalation run and the
//! interval driver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use escalation_core::config::ScheduleConfig;
use escalation_core::EscalationContext;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::cleanup::{self, RetentionReport, SubscriptionCleanupReport};
use crate::dispatcher::{self, EscalationReport};

/// One firing of the external schedule. Only ever logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub schedule: String,
    pub scheduled_time: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

impl Tick {
    pub fn now(schedule: &str) -> Self {
        let now = Utc::now();
        Self {
            schedule: schedule.to_string(),
            scheduled_time: now,
            fired_at: now,
        }
    }
}

/// Something a scheduler can invoke. `run` must not fail or panic outward.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, tick: Tick) -> RunSummary;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskGroup {
    SubscriptionCleanup,
    Escalation,
    Retention,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupReport {
    Subscriptions(SubscriptionCleanupReport),
    Escalation(EscalationReport),
    Retention(RetentionReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { report: GroupReport },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: TaskGroup,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

impl GroupSummary {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub tick: Tick,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub groups: Vec<GroupSummary>,
}

impl RunSummary {
    pub fn group(&self, group: TaskGroup) -> Option<&GroupSummary> {
        self.groups.iter().find(|g| g.group == group)
    }

    pub fn failed_groups(&self) -> usize {
        self.groups.iter().filter(|g| !g.is_completed()).count()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one task group, turning an error or a panic into a failed outcome.
async fn isolate<F>(group: TaskGroup, work: F) -> GroupSummary
where
    F: Future<Output = Result<GroupReport, String>> + Send,
{
    let started = Instant::now();
    let outcome = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(report)) => TaskOutcome::Completed { report },
        Ok(Err(error)) => {
            tracing::error!(group = ?group, "Task group failed: {}", error);
            TaskOutcome::Failed { error }
        }
        Err(panic) => {
            let error = format!("panicked: {}", panic_message(panic.as_ref()));
            tracing::error!(group = ?group, "Task group {}", error);
            TaskOutcome::Failed { error }
        }
    };

    GroupSummary {
        group,
        duration_ms: started.elapsed().as_millis() as u64,
        outcome,
    }
}

/// The periodic escalation job over an explicit context.
///
/// Clones share one run lock, so the scheduler and manual triggers never
/// execute task groups at the same time.
#[derive(Clone)]
pub struct EscalationTask {
    ctx: EscalationContext,
    run_lock: Arc<Mutex<()>>,
}

/// Exclusive right to run task groups, held until dropped.
pub struct RunPermit<'a> {
    task: &'a EscalationTask,
    _guard: MutexGuard<'a, ()>,
}

impl EscalationTask {
    pub fn new(ctx: EscalationContext) -> Self {
        Self {
            ctx,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn context(&self) -> &EscalationContext {
        &self.ctx
    }

    /// Waits until no other invocation is running.
    pub async fn acquire(&self) -> RunPermit<'_> {
        RunPermit {
            task: self,
            _guard: self.run_lock.lock().await,
        }
    }

    /// Returns `None` while another invocation is running.
    pub fn try_acquire(&self) -> Option<RunPermit<'_>> {
        let guard = self.run_lock.try_lock().ok()?;
        Some(RunPermit {
            task: self,
            _guard: guard,
        })
    }

    pub async fn subscription_cleanup(&self, now: DateTime<Utc>) -> GroupSummary {
        self.acquire().await.subscription_cleanup(now).await
    }

    pub async fn escalation(&self, now: DateTime<Utc>) -> GroupSummary {
        self.acquire().await.escalation(now).await
    }

    pub async fn retention(&self, now: DateTime<Utc>) -> GroupSummary {
        self.acquire().await.retention(now).await
    }

    pub async fn run_at(&self, tick: Tick, now: DateTime<Utc>) -> RunSummary {
        self.acquire().await.run_at(tick, now).await
    }
}

impl RunPermit<'_> {
    pub async fn subscription_cleanup(&self, now: DateTime<Utc>) -> GroupSummary {
        let ctx = &self.task.ctx;
        isolate(TaskGroup::SubscriptionCleanup, async {
            cleanup::cleanup_subscriptions(ctx, now)
                .await
                .map(GroupReport::Subscriptions)
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn escalation(&self, now: DateTime<Utc>) -> GroupSummary {
        let ctx = &self.task.ctx;
        isolate(TaskGroup::Escalation, async {
            dispatcher::escalate(ctx, now)
                .await
                .map(GroupReport::Escalation)
                .map_err(|e| e.to_string())
        })
        .await
    }

    pub async fn retention(&self, now: DateTime<Utc>) -> GroupSummary {
        let ctx = &self.task.ctx;
        isolate(TaskGroup::Retention, async {
            Ok(GroupReport::Retention(cleanup::run_retention(ctx, now).await))
        })
        .await
    }

    /// Runs the three groups in order against a fixed `now`.
    pub async fn run_at(&self, tick: Tick, now: DateTime<Utc>) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(
            run = %run_id,
            schedule = %tick.schedule,
            scheduled_time = %tick.scheduled_time,
            fired_at = %tick.fired_at,
            "Escalation run started"
        );

        let groups = vec![
            self.subscription_cleanup(now).await,
            self.escalation(now).await,
            self.retention(now).await,
        ];

        let summary = RunSummary {
            run_id,
            tick,
            started_at,
            finished_at: Utc::now(),
            groups,
        };

        tracing::info!(
            run = %summary.run_id,
            failed_groups = summary.failed_groups(),
            "Escalation run finished"
        );
        match serde_json::to_string(&summary) {
            Ok(json) => tracing::debug!(run = %summary.run_id, "Run summary: {}", json),
            Err(e) => tracing::warn!("Failed to serialize run summary: {}", e),
        }
        summary
    }
}

#[async_trait]
impl Task for EscalationTask {
    fn name(&self) -> &str {
        "overdue-escalation"
    }

    async fn run(&self, tick: Tick) -> RunSummary {
        let permit = self.acquire().await;
        permit.run_at(tick, Utc::now()).await
    }
}

/// Invokes `task` once per interval until `shutdown` resolves.
///
/// Ticks that fall due while a run is still going are dropped. A run
/// triggered elsewhere delays the tick until it finishes.
pub async fn drive<T, S>(task: Arc<T>, schedule: ScheduleConfig, shutdown: S)
where
    T: Task + ?Sized,
    S: Future<Output = ()>,
{
    let period = Duration::from_secs(schedule.interval_secs.max(1));
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    tracing::info!(task = task.name(), schedule = %schedule.descriptor, "Scheduler started");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(task = task.name(), "Scheduler stopping");
                break;
            }
            nominal = interval.tick() => {
                let fired_at = Utc::now();
                let lag = tokio::time::Instant::now().saturating_duration_since(nominal);
                let scheduled_time = fired_at
                    - chrono::Duration::from_std(lag).unwrap_or_else(|_| chrono::Duration::zero());
                let tick = Tick {
                    schedule: schedule.descriptor.clone(),
                    scheduled_time,
                    fired_at,
                };
                task.run(tick).await;
            }
        }
    }
}
