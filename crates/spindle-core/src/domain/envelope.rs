//! Envelope - ログに積まれる単位（command / event / message 共通）
//!
//! Payload の種類は `MessageKind` で明示的にタグ付けし、bus への振り分けは
//! `match` で網羅的に行います。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AggregateKey, CorrelationId, MessageId};

/// What a payload is, and therefore which bus it goes to.
///
/// `Unknown` absorbs kinds this build does not understand when an envelope
/// is read back from the store. Such messages are never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Event,
    Command,
    Notification,
    Request,
    #[serde(other)]
    Unknown,
}

/// Business value carried by an envelope.
///
/// The body is kept as JSON: handlers and aggregates decode it as they like.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub kind: MessageKind,

    /// Type name, e.g. `"Incremented"`.
    pub name: String,

    pub body: serde_json::Value,

    /// Internal events are sourced but never published.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub internal: bool,
}

impl Payload {
    pub fn new(kind: MessageKind, name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            body,
            internal: false,
        }
    }

    pub fn event(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(MessageKind::Event, name, body)
    }

    pub fn command(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(MessageKind::Command, name, body)
    }

    pub fn notification(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(MessageKind::Notification, name, body)
    }

    pub fn request(name: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(MessageKind::Request, name, body)
    }

    /// Mark this payload as internal to the aggregate.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }
}

/// Cross-cutting data attached to every envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub message_id: MessageId,
    pub correlation_id: CorrelationId,

    /// The envelope that caused this one (command → event, command → notification).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<MessageId>,

    /// Target (commands) or source (events, messages) aggregate.
    pub aggregate: AggregateKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Set when the envelope is accepted into a log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn new(
        message_id: MessageId,
        correlation_id: CorrelationId,
        aggregate: AggregateKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id,
            correlation_id,
            causation_id: None,
            aggregate,
            partition_id: None,
            user_id: None,
            created_at,
            received_at: None,
        }
    }

    /// Metadata for an envelope produced while handling `self`.
    ///
    /// Correlation, partition and user flow through; causation points back
    /// at `self`.
    pub fn caused(&self, message_id: MessageId, created_at: DateTime<Utc>) -> Self {
        Self {
            message_id,
            correlation_id: self.correlation_id,
            causation_id: Some(self.message_id),
            aggregate: self.aggregate.clone(),
            partition_id: self.partition_id.clone(),
            user_id: self.user_id.clone(),
            created_at,
            received_at: None,
        }
    }

    pub fn with_partition(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Payload + metadata, addressed by its position in a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// 1-based position in the owning log; 0 until appended.
    pub sequence_number: u64,
    pub payload: Payload,
    pub metadata: Metadata,
}

impl Envelope {
    pub fn new(payload: Payload, metadata: Metadata) -> Self {
        Self {
            sequence_number: 0,
            payload,
            metadata,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind
    }

    pub fn aggregate(&self) -> &AggregateKey {
        &self.metadata.aggregate
    }
}
