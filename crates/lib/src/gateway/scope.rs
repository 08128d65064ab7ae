//! Per-invocation execution scope: a deadline plus the conversation the event belongs to.

use crate::channels::ConversationContext;
use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, Instant};

/// Deadline used when `now + timeout` is not representable (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Passed to exactly one handler call. The deadline is cooperative: handlers
/// check it (or use [`run`](Self::run)) and stop their own work when it passes.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    deadline: Instant,
    context: ConversationContext,
    invocation_id: uuid::Uuid,
}

impl ExecutionScope {
    /// Scope whose deadline is `timeout` from now. Timeouts too large for the
    /// clock are clamped to a deadline decades away.
    pub fn new(context: ConversationContext, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            deadline: now
                .checked_add(timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
            context,
            invocation_id: uuid::Uuid::new_v4(),
        }
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Resolves when the deadline passes.
    pub async fn expired(&self) {
        tokio::time::sleep_until(self.deadline).await
    }

    /// Run `fut` bounded by the deadline.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.deadline, fut).await
    }

    /// Id for correlating log lines of one handler call.
    pub fn invocation_id(&self) -> uuid::Uuid {
        self.invocation_id
    }
}
