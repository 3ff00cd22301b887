//! Append-only, 1-based logs of envelopes.
//!
//! Layout in the state store:
//! - `"<LogName>"` holds the item count
//! - `"<LogName><sequence>"` holds one envelope

use crate::domain::Envelope;
use crate::ports::StoreError;

use super::StateTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedLog {
    name: &'static str,
}

pub const COMMAND_LOG: OrderedLog = OrderedLog::new("Command");
pub const EVENT_LOG: OrderedLog = OrderedLog::new("Event");
pub const MESSAGE_LOG: OrderedLog = OrderedLog::new("Message");

impl OrderedLog {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn count_key(&self) -> &'static str {
        self.name
    }

    pub fn item_key(&self, sequence: u64) -> String {
        format!("{}{}", self.name, sequence)
    }

    pub async fn count(&self, tx: &StateTransaction<'_>) -> Result<u64, StoreError> {
        Ok(tx.get::<u64>(self.count_key()).await?.unwrap_or(0))
    }

    pub async fn get(&self, tx: &StateTransaction<'_>, sequence: u64) -> Result<Envelope, StoreError> {
        let key = self.item_key(sequence);
        if sequence == 0 {
            return Err(StoreError::NotFound {
                aggregate: tx.aggregate().clone(),
                key,
            });
        }
        tx.require(&key).await
    }

    /// Append `items` after `expected_count` existing items and return the
    /// new count. Each item gets its sequence number assigned here.
    pub async fn append(
        &self,
        tx: &mut StateTransaction<'_>,
        items: Vec<Envelope>,
        expected_count: u64,
    ) -> Result<u64, StoreError> {
        let actual = self.count(tx).await?;
        if actual != expected_count {
            return Err(StoreError::CountMismatch {
                aggregate: tx.aggregate().clone(),
                log: self.name.to_string(),
                expected: expected_count,
                actual,
            });
        }
        if items.is_empty() {
            return Ok(expected_count);
        }

        let mut count = expected_count;
        for mut item in items {
            count += 1;
            item.sequence_number = count;
            tx.set(&self.item_key(count), &item)?;
        }
        tx.set(self.count_key(), &count)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AggregateKey, CorrelationId, MessageId, Metadata, Payload};
    use crate::impls::InMemoryStateStore;
    use crate::ports::StateStore;
    use chrono::Utc;
    use ulid::Ulid;

    fn envelope(name: &str) -> Envelope {
        Envelope::new(
            Payload::event(name, serde_json::json!({})),
            Metadata::new(
                MessageId::from_ulid(Ulid::new()),
                CorrelationId::from_ulid(Ulid::new()),
                AggregateKey::new("Counter", "1"),
                Utc::now(),
            ),
        )
    }

    #[test]
    fn keys_follow_log_name() {
        assert_eq!(EVENT_LOG.count_key(), "Event");
        assert_eq!(EVENT_LOG.item_key(12), "Event12");
        assert_eq!(COMMAND_LOG.item_key(1), "Command1");
    }

    #[tokio::test]
    async fn append_assigns_sequence_numbers() {
        let store = InMemoryStateStore::new();
        let mut tx = StateTransaction::new(&store, AggregateKey::new("Counter", "1"));

        let count = EVENT_LOG
            .append(&mut tx, vec![envelope("A"), envelope("B")], 0)
            .await
            .unwrap();
        assert_eq!(count, 2);
        let count = EVENT_LOG.append(&mut tx, vec![envelope("C")], 2).await.unwrap();
        assert_eq!(count, 3);

        let third = EVENT_LOG.get(&tx, 3).await.unwrap();
        assert_eq!(third.sequence_number, 3);
        assert_eq!(third.payload.name, "C");
        assert_eq!(EVENT_LOG.count(&tx).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn each_item_is_stored_under_its_own_key() {
        let store = InMemoryStateStore::new();
        let key = AggregateKey::new("Counter", "1");
        let mut tx = StateTransaction::new(&store, key.clone());
        MESSAGE_LOG
            .append(&mut tx, vec![envelope("A"), envelope("B")], 0)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(store.try_get(&key, "Message1").await.unwrap().is_some());
        assert!(store.try_get(&key, "Message2").await.unwrap().is_some());
        assert_eq!(
            store.try_get(&key, "Message").await.unwrap(),
            Some(serde_json::json!(2))
        );
    }

    #[tokio::test]
    async fn append_rejects_stale_expected_count() {
        let store = InMemoryStateStore::new();
        let mut tx = StateTransaction::new(&store, AggregateKey::new("Counter", "1"));
        EVENT_LOG.append(&mut tx, vec![envelope("A")], 0).await.unwrap();

        let err = EVENT_LOG
            .append(&mut tx, vec![envelope("B")], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CountMismatch { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn empty_append_writes_nothing() {
        let store = InMemoryStateStore::new();
        let mut tx = StateTransaction::new(&store, AggregateKey::new("Counter", "1"));
        assert_eq!(EVENT_LOG.append(&mut tx, vec![], 0).await.unwrap(), 0);
        assert!(!tx.is_dirty());
    }

    #[tokio::test]
    async fn get_out_of_range_fails() {
        let store = InMemoryStateStore::new();
        let tx = StateTransaction::new(&store, AggregateKey::new("Counter", "1"));
        assert!(EVENT_LOG.get(&tx, 0).await.is_err());
        assert!(EVENT_LOG.get(&tx, 1).await.is_err());
    }
}
