//! StateStore port - actor ごとの durable key/value 基盤
//!
//! エンジンはここに全てを保存します：
//! - ActorState（カーソル・カウンタ）
//! - 各ログの要素（"Command3", "Event12", ...）とログ長（"Command"）
//! - TaskProcessor（"TaskProcessor3"）
//!
//! # 設計原則
//! - `set` は書き込みを積むだけ、`save` で actor 単位にまとめて確定する
//! - ワイヤフォーマットは規定しない（値は serde_json::Value で受け渡す）
//! - 同じ actor に対しては常に 1 ターンからしか呼ばれない

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::AggregateKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state item {key} not found for {aggregate}")]
    NotFound { aggregate: AggregateKey, key: String },

    #[error("{log} log of {aggregate} has {actual} items, expected {expected}")]
    CountMismatch {
        aggregate: AggregateKey,
        log: String,
        expected: u64,
        actual: u64,
    },

    #[error("cannot encode or decode state item {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn try_get(
        &self,
        aggregate: &AggregateKey,
        key: &str,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set(
        &self,
        aggregate: &AggregateKey,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Make every `set` issued for `aggregate` since the last save durable.
    async fn save(&self, aggregate: &AggregateKey) -> Result<(), StoreError>;

    /// Drop every `set` issued for `aggregate` since the last save.
    async fn discard(&self, aggregate: &AggregateKey) -> Result<(), StoreError>;
}
