//! Aggregate: state rebuilt by folding the event log.

use serde::Serialize;
use thiserror::Error;

use super::envelope::Payload;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("cannot decode event {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

impl AggregateError {
    pub fn decode(name: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            name: name.into(),
            source,
        }
    }
}

/// A business entity whose current state is the fold of its events.
///
/// `apply` must be a pure function of `(self, event)`: the engine replays the
/// whole event log through it on every activation.
pub trait Aggregate: Default + Clone + Serialize + Send + Sync + 'static {
    /// Aggregate type name; must match the name part of every key routed here.
    const NAME: &'static str;

    fn apply(&mut self, event: &Payload) -> Result<(), AggregateError>;

    /// Has at least one event shaped this aggregate?
    fn is_initialized(&self) -> bool;
}


#[cfg(test)]
mod tests {
    use super::testing::Counter;
    use super::*;

    #[test]
    fn counter_folds_increments() {
        let mut c = Counter::default();
        assert!(!c.is_initialized());
        c.apply(&Payload::event("Incremented", serde_json::json!({ "by": 2 })))
            .unwrap();
        c.apply(&Payload::event("Incremented", serde_json::json!({ "by": 3 })))
            .unwrap();
        assert_eq!(c.value, 5);
        assert!(c.is_initialized());
    }

    #[test]
    fn undecodable_event_is_an_error() {
        let mut c = Counter::default();
        let err = c
            .apply(&Payload::event("Incremented", serde_json::json!({ "by": "x" })))
            .unwrap_err();
        assert!(err.to_string().contains("Incremented"));
    }
}
