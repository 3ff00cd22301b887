//! CommandHandler port - 業務ロジックとの境界
//!
//! Handler は `(command, metadata, aggregate)` を受け取り、
//! 発生した domain event と外部向け message を返すだけです。
//! 永続化・リトライ・配送はエンジン側の責務です。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Aggregate, Metadata, Payload};

/// What a successful command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Appended to the event log and folded into the aggregate.
    pub source_events: Vec<Payload>,

    /// Published without being sourced (notifications, follow-up commands, ...).
    pub integration_messages: Vec<Payload>,
}

impl HandlerOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event: Payload) -> Self {
        self.source_events.push(event);
        self
    }

    pub fn message(mut self, message: Payload) -> Self {
        self.integration_messages.push(message);
        self
    }
}

/// Handler failures, in two tiers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Business rule violation: retried according to the resiliency policy,
    /// then skipped with a failure notification.
    #[error("command rejected: {message}")]
    Rejected {
        message: String,
        technical_error: Option<String>,
    },

    /// Anything else: a defect. The turn fails and nothing is persisted.
    #[error("command handler fault: {0}")]
    Fault(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            technical_error: None,
        }
    }

    pub fn rejected_with(message: impl Into<String>, technical_error: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            technical_error: Some(technical_error.into()),
        }
    }

    pub fn fault(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Fault(error.into())
    }
}

#[async_trait]
pub trait CommandHandler<A: Aggregate>: Send + Sync {
    async fn dispatch(
        &self,
        command: &Payload,
        metadata: &Metadata,
        aggregate: &A,
    ) -> Result<HandlerOutput, HandlerError>;
}
