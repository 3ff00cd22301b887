//! Activation - actor が生きている間だけ持つキャッシュ
//!
//! ActorState と畳み込み済みの aggregate を保持し、ターンごとに `&mut` で
//! エンジンに渡されます。ターンが失敗したら `discard` で捨て、次のターンは
//! state store から読み直します（aggregate は event log から再構築）。

use crate::domain::{ActorState, Aggregate};

pub struct Activation<A: Aggregate> {
    pub(crate) state: Option<ActorState>,
    pub(crate) aggregate: Option<A>,
    replays: u64,
}

impl<A: Aggregate> Activation<A> {
    pub fn new() -> Self {
        Self {
            state: None,
            aggregate: None,
            replays: 0,
        }
    }

    /// Last committed ActorState, if this activation has loaded it.
    pub fn state(&self) -> Option<&ActorState> {
        self.state.as_ref()
    }

    pub fn aggregate(&self) -> Option<&A> {
        self.aggregate.as_ref()
    }

    /// How many times the event log was replayed in this activation.
    pub fn replays(&self) -> u64 {
        self.replays
    }

    pub fn is_warm(&self) -> bool {
        self.state.is_some()
    }

    pub(crate) fn record_replay(&mut self) {
        self.replays += 1;
    }

    /// Forget every cached value; the replay counter survives.
    pub fn discard(&mut self) {
        self.state = None;
        self.aggregate = None;
    }
}

impl<A: Aggregate> Default for Activation<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregate::testing::Counter;

    #[test]
    fn discard_keeps_replay_count() {
        let mut act = Activation::<Counter>::new();
        act.state = Some(ActorState::default());
        act.aggregate = Some(Counter::default());
        act.record_replay();
        assert!(act.is_warm());

        act.discard();
        assert!(!act.is_warm());
        assert!(act.aggregate().is_none());
        assert_eq!(act.replays(), 1);
    }
}
