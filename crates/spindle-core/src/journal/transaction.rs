//! Per-turn write buffer over a [`StateStore`].
//!
//! Reads see the turn's own writes first. Nothing reaches the store until
//! `commit`; dropping the transaction discards the turn.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::domain::AggregateKey;
use crate::ports::{StateStore, StoreError};

pub struct StateTransaction<'s> {
    store: &'s dyn StateStore,
    aggregate: AggregateKey,
    pending: BTreeMap<String, serde_json::Value>,
}

impl<'s> StateTransaction<'s> {
    pub fn new(store: &'s dyn StateStore, aggregate: AggregateKey) -> Self {
        Self {
            store,
            aggregate,
            pending: BTreeMap::new(),
        }
    }

    pub fn aggregate(&self) -> &AggregateKey {
        &self.aggregate
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let value = match self.pending.get(key) {
            Some(value) => Some(value.clone()),
            None => self.store.try_get(&self.aggregate, key).await?,
        };
        value
            .map(|v| {
                serde_json::from_value(v).map_err(|source| StoreError::Codec {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub async fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        self.get(key).await?.ok_or_else(|| StoreError::NotFound {
            aggregate: self.aggregate.clone(),
            key: key.to_string(),
        })
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.pending.insert(key.to_string(), value);
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Write every pending item and save. A clean transaction touches nothing.
    ///
    /// On failure the items already handed to the store are discarded, so the
    /// next turn never reads half of this one.
    pub async fn commit(self) -> Result<(), StoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let store = self.store;
        let aggregate = self.aggregate;
        let result = Self::write_all(store, &aggregate, self.pending).await;
        if result.is_err()
            && let Err(err) = store.discard(&aggregate).await
        {
            warn!(aggregate = %aggregate, error = %err, "could not discard a failed commit");
        }
        result
    }

    async fn write_all(
        store: &dyn StateStore,
        aggregate: &AggregateKey,
        pending: BTreeMap<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        for (key, value) in pending {
            store.set(aggregate, &key, value).await?;
        }
        store.save(aggregate).await
    }
}
