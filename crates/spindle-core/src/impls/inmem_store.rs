//! InMemoryStateStore - 開発・テスト用の StateStore
//!
//! # 実装詳細
//! - aggregate ごとに committed / staged の 2 つの HashMap を持つ
//! - `set` は staged に積むだけ、`save` で committed に移す
//! - `discard_unsaved` で「save 前にプロセスが落ちた」状況を再現できる

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::AggregateKey;
use crate::ports::{StateStore, StoreError};

#[derive(Default)]
struct Scope {
    committed: HashMap<String, serde_json::Value>,
    staged: HashMap<String, serde_json::Value>,
    saves: u64,
}

#[derive(Default)]
pub struct InMemoryStateStore {
    scopes: Mutex<HashMap<AggregateKey, Scope>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every staged write (simulates a crash before `save`).
    pub async fn discard_unsaved(&self) {
        let mut scopes = self.scopes.lock().await;
        for scope in scopes.values_mut() {
            scope.staged.clear();
        }
    }

    /// Committed value, ignoring staged writes.
    pub async fn committed(&self, aggregate: &AggregateKey, key: &str) -> Option<serde_json::Value> {
        let scopes = self.scopes.lock().await;
        scopes
            .get(aggregate)
            .and_then(|scope| scope.committed.get(key).cloned())
    }

    pub async fn save_count(&self, aggregate: &AggregateKey) -> u64 {
        let scopes = self.scopes.lock().await;
        scopes.get(aggregate).map_or(0, |scope| scope.saves)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn try_get(
        &self,
        aggregate: &AggregateKey,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let scopes = self.scopes.lock().await;
        let Some(scope) = scopes.get(aggregate) else {
            return Ok(None);
        };
        Ok(scope
            .staged
            .get(key)
            .or_else(|| scope.committed.get(key))
            .cloned())
    }

    async fn set(
        &self,
        aggregate: &AggregateKey,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut scopes = self.scopes.lock().await;
        scopes
            .entry(aggregate.clone())
            .or_default()
            .staged
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn save(&self, aggregate: &AggregateKey) -> Result<(), StoreError> {
        let mut scopes = self.scopes.lock().await;
        let scope = scopes.entry(aggregate.clone()).or_default();
        let staged = std::mem::take(&mut scope.staged);
        scope.committed.extend(staged);
        scope.saves += 1;
        Ok(())
    }

    async fn discard(&self, aggregate: &AggregateKey) -> Result<(), StoreError> {
        let mut scopes = self.scopes.lock().await;
        if let Some(scope) = scopes.get_mut(aggregate) {
            scope.staged.clear();
        }
        Ok(())
    }
}
