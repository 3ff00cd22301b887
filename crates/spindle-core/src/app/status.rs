//! Status - actor の状態を外から見るためのビュー
//!
//! ActorState をそのまま晒さず、運用で見たい値（残件数、reminder の有無、
//! publish の詰まり）だけをまとめます。

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{ActorState, AggregateKey};

/// Point-in-time view of one aggregate actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorStatus {
    pub key: AggregateKey,
    pub command_count: u64,
    pub last_command_processed: u64,
    pub event_source_count: u64,
    pub message_count: u64,
    pub last_message_published: u64,
    pub publish_failed: bool,
    pub process_reminder_registered: bool,
    pub publish_reminder_registered: bool,
    pub retry_at: Option<DateTime<Utc>>,
}

impl ActorStatus {
    pub fn from_state(key: AggregateKey, state: &ActorState) -> Self {
        Self {
            key,
            command_count: state.command_count,
            last_command_processed: state.last_command_processed,
            event_source_count: state.event_source_count,
            message_count: state.message_count,
            last_message_published: state.last_message_published,
            publish_failed: state.publish_failed,
            process_reminder_registered: state.process_reminder_due_time.is_some(),
            publish_reminder_registered: state.publish_reminder_due_time.is_some(),
            retry_at: state.retry_on_failure_date_time,
        }
    }

    pub fn pending_commands(&self) -> u64 {
        self.command_count - self.last_command_processed
    }

    pub fn pending_messages(&self) -> u64 {
        self.message_count - self.last_message_published
    }

    /// Nothing left to process or publish.
    pub fn is_drained(&self) -> bool {
        self.pending_commands() == 0 && self.pending_messages() == 0
    }
}
