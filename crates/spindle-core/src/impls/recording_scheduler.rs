//! RecordingScheduler - 呼び出しを記録するだけの Scheduler（テスト用）
//!
//! エンジン単体のテストでは実際に起こさず、「何を張ったか」だけを検証する。

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::AggregateKey;
use crate::ports::{Scheduler, SchedulerError, WakeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleCall {
    Timer {
        key: AggregateKey,
        kind: WakeKind,
        due: Duration,
    },
    Register {
        key: AggregateKey,
        kind: WakeKind,
        due: Duration,
        period: Duration,
    },
    Unregister {
        key: AggregateKey,
        kind: WakeKind,
    },
}

#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<ScheduleCall>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<ScheduleCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }

    /// `(due, period)` of the reminder as it stands after all recorded calls.
    pub async fn reminder(&self, key: &AggregateKey, kind: WakeKind) -> Option<(Duration, Duration)> {
        let calls = self.calls.lock().await;
        let mut current = None;
        for call in calls.iter() {
            match call {
                ScheduleCall::Register {
                    key: k,
                    kind: w,
                    due,
                    period,
                } if k == key && *w == kind => current = Some((*due, *period)),
                ScheduleCall::Unregister { key: k, kind: w } if k == key && *w == kind => {
                    current = None
                }
                _ => {}
            }
        }
        current
    }

    pub async fn last_timer(&self, key: &AggregateKey, kind: WakeKind) -> Option<Duration> {
        let calls = self.calls.lock().await;
        calls.iter().rev().find_map(|call| match call {
            ScheduleCall::Timer { key: k, kind: w, due } if k == key && *w == kind => Some(*due),
            _ => None,
        })
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn arm_timer(&self, key: &AggregateKey, kind: WakeKind, due: Duration) {
        self.calls.lock().await.push(ScheduleCall::Timer {
            key: key.clone(),
            kind,
            due,
        });
    }

    async fn register_reminder(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
        due: Duration,
        period: Duration,
    ) -> Result<(), SchedulerError> {
        self.calls.lock().await.push(ScheduleCall::Register {
            key: key.clone(),
            kind,
            due,
            period,
        });
        Ok(())
    }

    async fn unregister_reminder(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
    ) -> Result<(), SchedulerError> {
        self.calls.lock().await.push(ScheduleCall::Unregister {
            key: key.clone(),
            kind,
        });
        Ok(())
    }
}
