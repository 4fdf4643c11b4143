pub mod cleanup;
pub mod detector;
pub mod dispatcher;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use cleanup::{RetentionReport, SubscriptionCleanupReport, SubtaskReport};
pub use detector::detect_overdue;
pub use dispatcher::{escalate, EscalationReport};
pub use scheduler::{
    drive, EscalationTask, GroupReport, GroupSummary, RunPermit, RunSummary, Task, TaskGroup,
    TaskOutcome, Tick,
};
