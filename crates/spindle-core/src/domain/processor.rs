//! Task processor: state machine for the attempts at one command sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::policy::{ResiliencyPolicy, RetryDecision};

/// State transitions:
/// - New -> Active (start)
/// - Active -> Completed (complete)
/// - Active -> Suspended (fail, policy still allows a retry)
/// - Active -> Canceled (fail, policy stopped)
/// - Suspended -> Active | Suspended | Canceled (resume)
/// - any non-terminal -> Canceled (cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    New,
    Active,
    Suspended,
    Completed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid task transition from {from:?} to {to:?}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub created_date: DateTime<Utc>,
    pub processing_start_date: Option<DateTime<Utc>>,
    pub suspended_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub canceled_date: Option<DateTime<Utc>>,
}

/// Last failure and how many failures happened so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub count: u32,
    pub date: DateTime<Utc>,

    /// Business-facing message.
    pub message: String,

    /// Operator-facing detail.
    pub technical_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProcessor {
    pub status: TaskStatus,
    pub history: TaskHistory,
    pub failure: Option<TaskFailure>,
    pub policy: ResiliencyPolicy,
}

impl TaskProcessor {
    pub fn new(policy: ResiliencyPolicy, now: DateTime<Utc>) -> Self {
        Self {
            status: TaskStatus::New,
            history: TaskHistory {
                created_date: now,
                processing_start_date: None,
                suspended_date: None,
                completed_date: None,
                canceled_date: None,
            },
            failure: None,
            policy,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure.as_ref().map_or(0, |f| f.count)
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status != TaskStatus::New {
            return Err(self.invalid(TaskStatus::Active));
        }
        self.status = TaskStatus::Active;
        self.history.processing_start_date = Some(now);
        Ok(())
    }

    /// Re-evaluate the policy for a suspended task.
    ///
    /// Stays Suspended (no-op) while the next retry is not due yet.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let started = match (self.status, self.history.processing_start_date) {
            (TaskStatus::Suspended, Some(started)) => started,
            _ => return Err(self.invalid(TaskStatus::Active)),
        };
        match self.policy.can_retry(started, self.failure_count(), now) {
            RetryDecision::Enabled => {
                self.status = TaskStatus::Active;
                self.history.suspended_date = None;
            }
            RetryDecision::Suspended => {}
            RetryDecision::Stopped => self.mark_canceled(now),
        }
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Active => {
                self.status = TaskStatus::Completed;
                self.history.completed_date = Some(now);
                Ok(())
            }
            TaskStatus::Completed | TaskStatus::Canceled => Ok(()),
            TaskStatus::New | TaskStatus::Suspended => Err(self.invalid(TaskStatus::Completed)),
        }
    }

    /// Record a failure; the policy decides between Suspended and Canceled.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        technical_error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match self.status {
            TaskStatus::Active => {}
            TaskStatus::Completed | TaskStatus::Canceled => return Ok(()),
            TaskStatus::New | TaskStatus::Suspended => {
                return Err(self.invalid(TaskStatus::Suspended));
            }
        }

        let count = self.failure_count() + 1;
        self.failure = Some(TaskFailure {
            count,
            date: now,
            message: message.into(),
            technical_error,
        });

        let started = self
            .history
            .processing_start_date
            .unwrap_or(self.history.created_date);
        match self.policy.can_retry(started, count, now) {
            RetryDecision::Stopped => self.mark_canceled(now),
            RetryDecision::Enabled | RetryDecision::Suspended => {
                self.status = TaskStatus::Suspended;
                self.history.suspended_date = Some(now);
            }
        }
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        if !self.status.is_terminal() {
            self.mark_canceled(now);
        }
    }

    /// When the next attempt may run (only meaningful while Suspended).
    pub fn next_retry_time(&self) -> Option<DateTime<Utc>> {
        if self.status != TaskStatus::Suspended {
            return None;
        }
        let started = self
            .history
            .processing_start_date
            .unwrap_or(self.history.created_date);
        Some(self.policy.next_retry_time(started, self.failure_count()))
    }

    /// Remaining wait until the next attempt (only meaningful while Suspended).
    pub fn retry_wait_time(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.next_retry_time()
            .map(|at| (at - now).to_std().unwrap_or(std::time::Duration::ZERO))
    }

    fn mark_canceled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Canceled;
        self.history.canceled_date = Some(now);
    }

    fn invalid(&self, to: TaskStatus) -> TransitionError {
        TransitionError {
            from: self.status,
            to,
        }
    }
}
