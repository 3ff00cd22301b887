//! RuntimeScheduler - ランタイム上での Scheduler 実装
//!
//! - timer: `tokio::spawn` + `sleep` で one-shot に wake を流す。プロセスが
//!   落ちれば消えるが、それは reminder が拾う
//! - reminder: ReminderTable に書くだけ。発火は ReminderLoop の仕事
//!
//! どちらの wake も同じチャネルに入り、ランタイムの dispatcher が actor の
//! mailbox に振り分けます。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::AggregateKey;
use crate::ports::{Clock, Reminder, ReminderTable, Scheduler, SchedulerError, WakeKind};

/// One wake-up addressed to one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wake {
    pub key: AggregateKey,
    pub kind: WakeKind,
}

pub struct RuntimeScheduler {
    wakes: mpsc::UnboundedSender<Wake>,
    reminders: Arc<dyn ReminderTable>,
    clock: Arc<dyn Clock>,
}

impl RuntimeScheduler {
    pub fn new(
        wakes: mpsc::UnboundedSender<Wake>,
        reminders: Arc<dyn ReminderTable>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            wakes,
            reminders,
            clock,
        }
    }
}

fn after(now: DateTime<Utc>, due: Duration) -> DateTime<Utc> {
    let due = TimeDelta::from_std(due).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(due).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl Scheduler for RuntimeScheduler {
    async fn arm_timer(&self, key: &AggregateKey, kind: WakeKind, due: Duration) {
        let wakes = self.wakes.clone();
        let wake = Wake {
            key: key.clone(),
            kind,
        };
        tokio::spawn(async move {
            tokio::time::sleep(due).await;
            // dispatcher gone: the runtime stopped, the reminder takes over
            let _ = wakes.send(wake);
        });
    }

    async fn register_reminder(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
        due: Duration,
        period: Duration,
    ) -> Result<(), SchedulerError> {
        let next_fire_at = after(self.clock.now(), due);
        debug!(aggregate = %key, %kind, %next_fire_at, ?period, "reminder registered");
        self.reminders
            .upsert(Reminder {
                key: key.clone(),
                kind,
                next_fire_at,
                period,
            })
            .await
    }

    async fn unregister_reminder(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
    ) -> Result<(), SchedulerError> {
        debug!(aggregate = %key, %kind, "reminder unregistered");
        self.reminders.remove(key, kind).await
    }
}
