//! Schedule - ターン終了時に「次にいつ起こすか」を決める純粋関数
//!
//! - 仕事が残っていれば timer（one-shot）を張り直し、reminder を登録する
//! - reminder は due が変わったときだけ再登録する（毎ターンの churn を避ける）
//! - 仕事が無くなったら reminder を外す

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{ActorState, AggregateKey};
use crate::ports::{Scheduler, SchedulerError, WakeKind};

use super::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    Timer {
        kind: WakeKind,
        due: Duration,
    },
    Register {
        kind: WakeKind,
        due: Duration,
        period: Duration,
    },
    Unregister {
        kind: WakeKind,
    },
}

/// Plan the process loop's continuation and record reminder changes on `state`.
///
/// A command waiting on its retry (`retry_on_failure_date_time` set) delays
/// both the timer and the reminder until it is due.
pub fn plan_process(
    state: &mut ActorState,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Vec<ScheduleAction> {
    if !state.has_pending_commands() {
        return unregister(&mut state.process_reminder_due_time, WakeKind::Process);
    }

    let retry_wait = state
        .retry_on_failure_date_time
        .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));

    let (timer, due, period) = match retry_wait {
        Some(wait) => (wait, wait, backoff_period(config)),
        None => (config.timer_due, config.reminder_period, config.reminder_period),
    };
    arm(&mut state.process_reminder_due_time, WakeKind::Process, timer, due, period)
}

/// Plan the publish loop's continuation and record reminder changes on `state`.
pub fn plan_publish(state: &mut ActorState, config: &EngineConfig) -> Vec<ScheduleAction> {
    if !state.has_pending_messages() {
        return unregister(&mut state.publish_reminder_due_time, WakeKind::Publish);
    }

    let (timer, due, period) = if state.publish_failed {
        let period = backoff_period(config);
        (config.publish_retry_delay, period, period)
    } else {
        (config.timer_due, config.reminder_period, config.reminder_period)
    };
    arm(&mut state.publish_reminder_due_time, WakeKind::Publish, timer, due, period)
}

/// Carry out a plan against the scheduler.
pub async fn apply(
    scheduler: &dyn Scheduler,
    key: &AggregateKey,
    actions: &[ScheduleAction],
) -> Result<(), SchedulerError> {
    for action in actions {
        match *action {
            ScheduleAction::Timer { kind, due } => scheduler.arm_timer(key, kind, due).await,
            ScheduleAction::Register { kind, due, period } => {
                scheduler.register_reminder(key, kind, due, period).await?
            }
            ScheduleAction::Unregister { kind } => scheduler.unregister_reminder(key, kind).await?,
        }
    }
    Ok(())
}

fn backoff_period(config: &EngineConfig) -> Duration {
    config.backoff_reminder_period.max(config.reminder_period)
}

fn arm(
    registered_due: &mut Option<Duration>,
    kind: WakeKind,
    timer: Duration,
    due: Duration,
    period: Duration,
) -> Vec<ScheduleAction> {
    let mut actions = vec![ScheduleAction::Timer { kind, due: timer }];
    if *registered_due != Some(due) {
        actions.push(ScheduleAction::Register { kind, due, period });
        *registered_due = Some(due);
    }
    actions
}

fn unregister(registered_due: &mut Option<Duration>, kind: WakeKind) -> Vec<ScheduleAction> {
    if registered_due.take().is_some() {
        vec![ScheduleAction::Unregister { kind }]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn pending_commands() -> ActorState {
        ActorState {
            command_count: 2,
            last_command_processed: 0,
            ..ActorState::default()
        }
    }

    #[test]
    fn pending_commands_arm_timer_and_register_once() {
        let config = EngineConfig::default();
        let mut state = pending_commands();

        let first = plan_process(&mut state, &config, t0());
        assert_eq!(
            first,
            vec![
                ScheduleAction::Timer {
                    kind: WakeKind::Process,
                    due: config.timer_due
                },
                ScheduleAction::Register {
                    kind: WakeKind::Process,
                    due: config.reminder_period,
                    period: config.reminder_period
                },
            ]
        );
        assert_eq!(state.process_reminder_due_time, Some(config.reminder_period));

        let second = plan_process(&mut state, &config, t0());
        assert_eq!(
            second,
            vec![ScheduleAction::Timer {
                kind: WakeKind::Process,
                due: config.timer_due
            }]
        );
    }

    #[test]
    fn suspended_command_waits_for_retry_time() {
        let config = EngineConfig::default();
        let mut state = pending_commands();
        state.retry_on_failure_date_time = Some(t0() + TimeDelta::minutes(10));

        let actions = plan_process(&mut state, &config, t0());
        let ten_minutes = Duration::from_secs(600);
        assert_eq!(
            actions,
            vec![
                ScheduleAction::Timer {
                    kind: WakeKind::Process,
                    due: ten_minutes
                },
                ScheduleAction::Register {
                    kind: WakeKind::Process,
                    due: ten_minutes,
                    period: config.backoff_reminder_period
                },
            ]
        );
    }

    #[test]
    fn drained_commands_unregister_only_when_registered() {
        let config = EngineConfig::default();
        let mut state = ActorState {
            command_count: 1,
            last_command_processed: 1,
            process_reminder_due_time: Some(config.reminder_period),
            ..ActorState::default()
        };

        let actions = plan_process(&mut state, &config, t0());
        assert_eq!(
            actions,
            vec![ScheduleAction::Unregister {
                kind: WakeKind::Process
            }]
        );
        assert_eq!(state.process_reminder_due_time, None);
        assert!(plan_process(&mut state, &config, t0()).is_empty());
    }

    #[test]
    fn failed_publish_backs_off() {
        let config = EngineConfig::default();
        let mut state = ActorState {
            message_count: 1,
            publish_failed: true,
            ..ActorState::default()
        };

        let actions = plan_publish(&mut state, &config);
        assert_eq!(
            actions[0],
            ScheduleAction::Timer {
                kind: WakeKind::Publish,
                due: config.publish_retry_delay
            }
        );
        assert_eq!(state.publish_reminder_due_time, Some(config.backoff_reminder_period));
    }

    #[test]
    fn recovered_publish_shortens_reminder_again() {
        let config = EngineConfig::default();
        let mut state = ActorState {
            message_count: 2,
            last_message_published: 1,
            publish_reminder_due_time: Some(config.backoff_reminder_period),
            ..ActorState::default()
        };

        let actions = plan_publish(&mut state, &config);
        assert!(actions.contains(&ScheduleAction::Register {
            kind: WakeKind::Publish,
            due: config.reminder_period,
            period: config.reminder_period
        }));
    }
}
