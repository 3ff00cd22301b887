//! ReminderTable port - 永続化される「次に起こす時刻」の表
//!
//! reminder loop がこの表を定期的に読み、期限が来たものを wake として
//! actor に流します。発火したものは `now + period` に繰り延べます。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::AggregateKey;
use crate::ports::{SchedulerError, WakeKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub key: AggregateKey,
    pub kind: WakeKind,
    pub next_fire_at: DateTime<Utc>,
    pub period: Duration,
}

#[async_trait]
pub trait ReminderTable: Send + Sync {
    async fn upsert(&self, reminder: Reminder) -> Result<(), SchedulerError>;

    async fn remove(&self, key: &AggregateKey, kind: WakeKind) -> Result<(), SchedulerError>;

    async fn get(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
    ) -> Result<Option<Reminder>, SchedulerError>;

    /// Reminders due at `now`; each returned reminder is pushed to
    /// `now + period` before this returns.
    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, SchedulerError>;
}
