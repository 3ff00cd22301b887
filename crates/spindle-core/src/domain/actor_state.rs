//! Durable bookkeeping for one aggregate instance.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cursor and count record of one aggregate actor.
///
/// Invariants:
/// - `last_command_processed <= command_count`
/// - `last_message_published <= message_count`
/// - every counter only grows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorState {
    pub command_count: u64,
    pub last_command_processed: u64,
    pub event_source_count: u64,
    pub message_count: u64,
    pub last_message_published: u64,

    /// Due time of the registered process reminder (None = not registered).
    pub process_reminder_due_time: Option<Duration>,

    /// Due time of the registered publish reminder (None = not registered).
    pub publish_reminder_due_time: Option<Duration>,

    pub publish_failed: bool,

    /// When the suspended command becomes due again.
    pub retry_on_failure_date_time: Option<DateTime<Utc>>,

    /// Wait that was computed when the command got suspended.
    pub retry_on_failure_period: Option<Duration>,

    /// Last time a retry notification went out, for the dedup window.
    pub failure_notified_at: Option<DateTime<Utc>>,
}

impl ActorState {
    pub fn has_pending_commands(&self) -> bool {
        self.last_command_processed < self.command_count
    }

    pub fn has_pending_messages(&self) -> bool {
        self.last_message_published < self.message_count
    }

    pub fn next_command_sequence(&self) -> u64 {
        self.last_command_processed + 1
    }

    pub fn next_message_sequence(&self) -> u64 {
        self.last_message_published + 1
    }

    /// Forget the retry bookkeeping of the command that just left the queue.
    pub fn clear_retry(&mut self) {
        self.retry_on_failure_date_time = None;
        self.retry_on_failure_period = None;
        self.failure_notified_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_pending_work() {
        let state = ActorState::default();
        assert!(!state.has_pending_commands());
        assert!(!state.has_pending_messages());
        assert_eq!(state.next_command_sequence(), 1);
        assert_eq!(state.next_message_sequence(), 1);
    }

    #[test]
    fn pending_work_follows_cursors() {
        let state = ActorState {
            command_count: 3,
            last_command_processed: 1,
            message_count: 2,
            last_message_published: 2,
            ..ActorState::default()
        };
        assert!(state.has_pending_commands());
        assert_eq!(state.next_command_sequence(), 2);
        assert!(!state.has_pending_messages());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let state: ActorState = serde_json::from_str(r#"{ "command_count": 4 }"#).unwrap();
        assert_eq!(state.command_count, 4);
        assert_eq!(state.last_command_processed, 0);
        assert!(!state.publish_failed);
        assert_eq!(state.process_reminder_due_time, None);
    }
}
