//! ReminderLoop - 期限の来た reminder を wake に変える
//!
//! # フロー
//! 1. `interval` ごとに ReminderTable::take_due(now)
//! 2. 期限の来たものを wake としてチャネルに流す（表の側は now + period に繰り延べ済み）
//! 3. shutdown が来たら抜ける
//!
//! プロセス再起動後も表が残っていれば、ここから actor が起こされます。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::ports::{Clock, ReminderTable, SchedulerError};

use super::runtime_scheduler::Wake;

pub struct ReminderLoop {
    reminders: Arc<dyn ReminderTable>,
    clock: Arc<dyn Clock>,
    wakes: mpsc::UnboundedSender<Wake>,
    interval: Duration,
}

impl ReminderLoop {
    pub fn new(
        reminders: Arc<dyn ReminderTable>,
        clock: Arc<dyn Clock>,
        wakes: mpsc::UnboundedSender<Wake>,
        interval: Duration,
    ) -> Self {
        Self {
            reminders,
            clock,
            wakes,
            interval,
        }
    }

    /// Fire every due reminder once. Returns how many fired.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let due = self.reminders.take_due(self.clock.now()).await?;
        let fired = due.len();
        for reminder in due {
            debug!(aggregate = %reminder.key, kind = %reminder.kind, "reminder fired");
            let wake = Wake {
                key: reminder.key,
                kind: reminder.kind,
            };
            if self.wakes.send(wake).is_err() {
                break;
            }
        }
        Ok(fired)
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Err(err) = self.tick().await {
                warn!(error = %err, "reminder poll failed");
            }
        }
    }
}
