//! Domain model (ids, envelopes, policy, task processor, actor state).
//!
//! Pure values and state machines: no I/O, no clock. Time is always passed
//! in by the caller.

pub mod actor_state;
pub mod aggregate;
pub mod envelope;
pub mod ids;
pub mod policy;
pub mod processor;

pub use actor_state::ActorState;
pub use aggregate::{Aggregate, AggregateError};
pub use envelope::{Envelope, MessageKind, Metadata, Payload};
pub use ids::{AggregateId, AggregateKey, AggregateName, CorrelationId, MessageId};
pub use policy::{ResiliencyPolicy, RetryDecision};
pub use processor::{TaskFailure, TaskHistory, TaskProcessor, TaskStatus, TransitionError};
