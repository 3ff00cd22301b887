//! InMemoryReminderTable - 開発用の reminder 表
//!
//! 本番では StateStore と同じ durable 基盤に置く想定。ここでは
//! `BTreeMap` で (key, kind) ごとに 1 件だけ保持します。

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::domain::AggregateKey;
use crate::ports::{Reminder, ReminderTable, SchedulerError, WakeKind};

#[derive(Default)]
pub struct InMemoryReminderTable {
    reminders: Mutex<BTreeMap<(AggregateKey, WakeKind), Reminder>>,
}

impl InMemoryReminderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.reminders.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reminders.lock().await.is_empty()
    }
}

#[async_trait]
impl ReminderTable for InMemoryReminderTable {
    async fn upsert(&self, reminder: Reminder) -> Result<(), SchedulerError> {
        let mut reminders = self.reminders.lock().await;
        reminders.insert((reminder.key.clone(), reminder.kind), reminder);
        Ok(())
    }

    async fn remove(&self, key: &AggregateKey, kind: WakeKind) -> Result<(), SchedulerError> {
        let mut reminders = self.reminders.lock().await;
        reminders.remove(&(key.clone(), kind));
        Ok(())
    }

    async fn get(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
    ) -> Result<Option<Reminder>, SchedulerError> {
        let reminders = self.reminders.lock().await;
        Ok(reminders.get(&(key.clone(), kind)).cloned())
    }

    async fn take_due(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>, SchedulerError> {
        let mut reminders = self.reminders.lock().await;
        let mut due = Vec::new();
        for reminder in reminders.values_mut() {
            if reminder.next_fire_at > now {
                continue;
            }
            due.push(reminder.clone());
            let period = TimeDelta::from_std(reminder.period).unwrap_or(TimeDelta::MAX);
            reminder.next_fire_at = now
                .checked_add_signed(period)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        }
        Ok(due)
    }
}
