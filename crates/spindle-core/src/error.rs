use thiserror::Error;

use crate::domain::{AggregateError, AggregateKey, TransitionError};
use crate::ports::{SchedulerError, StoreError};

/// Errors that abort a turn.
///
/// A turn that returns one of these persists nothing; the next wake-up
/// retries from the same cursors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("envelope for {actual} routed to actor {expected}")]
    KeyMismatch {
        expected: AggregateKey,
        actual: AggregateKey,
    },

    #[error("actor {key} cannot host {expected} aggregates")]
    AggregateType {
        expected: &'static str,
        key: AggregateKey,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("aggregate replay failed: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("command handler fault on {aggregate} command #{sequence}: {source}")]
    HandlerFault {
        aggregate: AggregateKey,
        sequence: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot serialize snapshot of {aggregate}: {source}")]
    Snapshot {
        aggregate: AggregateKey,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("actor {0} is unavailable")]
    ActorUnavailable(AggregateKey),
}
