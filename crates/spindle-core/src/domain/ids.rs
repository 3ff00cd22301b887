//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom Type
//! メッセージ単位の識別子（message / correlation）は ULID を使います。
//! `Id<T>` で共通実装を提供し、`T` はマーカー型としてコンパイル時にだけ
//! 効くので、`MessageId` と `CorrelationId` を取り違えることはできません。
//!
//! Aggregate の識別子（`AggregateName`, `AggregateId`）は業務側が決める
//! 文字列なので、ULID ではなく newtype で包みます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"msg-", "corr-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Message のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

/// Correlation のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Correlation {}

impl IdMarker for Correlation {
    fn prefix() -> &'static str {
        "corr-"
    }
}

/// Identifier of one envelope (command, event or message).
pub type MessageId = Id<Message>;

/// Identifier shared by every envelope caused by the same external request.
pub type CorrelationId = Id<Correlation>;

/// Aggregate type name, e.g. `"Counter"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateName(String);

impl AggregateName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Business identifier of one aggregate instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateId(String);

impl AggregateId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of one single-writer shard: all commands for the same key run
/// sequentially, different keys never share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub name: AggregateName,
    pub id: AggregateId,
}

impl AggregateKey {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: AggregateName::new(name),
            id: AggregateId::new(id),
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();

        let message = MessageId::from_ulid(ulid1);
        let correlation = CorrelationId::from_ulid(ulid2);

        assert_eq!(message.as_ulid(), ulid1);
        assert_eq!(correlation.as_ulid(), ulid2);

        assert!(message.to_string().starts_with("msg-"));
        assert!(correlation.to_string().starts_with("corr-"));
        // let _: MessageId = correlation; // <- does not compile
    }

    #[test]
    fn ulid_ids_can_be_serialized() {
        let id = MessageId::from_ulid(Ulid::new());

        let serialized = serde_json::to_string(&id).unwrap();
        let deserialized: MessageId = serde_json::from_str(&serialized).unwrap();

        assert_eq!(id, deserialized);
    }

    #[test]
    fn aggregate_key_displays_name_and_id() {
        let key = AggregateKey::new("Counter", "c-1");
        assert_eq!(key.to_string(), "Counter/c-1");
        assert_eq!(key.name.as_str(), "Counter");
        assert_eq!(key.id.as_str(), "c-1");
    }

    #[test]
    fn aggregate_keys_compare_by_both_parts() {
        assert_ne!(AggregateKey::new("Counter", "1"), AggregateKey::new("Order", "1"));
        assert_ne!(AggregateKey::new("Counter", "1"), AggregateKey::new("Counter", "2"));
        assert_eq!(AggregateKey::new("Counter", "1"), AggregateKey::new("Counter", "1"));
    }
}
