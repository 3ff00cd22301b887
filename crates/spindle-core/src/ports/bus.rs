//! MessageBus port - 外部バスへの配送
//!
//! 種類（event / command / notification / request）ごとに 1 つの入口。
//! 実装は内部でリトライしない：失敗はそのまま返し、再送はエンジンが
//! カーソルを進めないことで実現する。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Envelope;

#[derive(Debug, Error)]
#[error("publish failed: {0}")]
pub struct PublishError(pub String);

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_event(&self, envelope: &Envelope) -> Result<(), PublishError>;

    async fn send_command(&self, envelope: &Envelope) -> Result<(), PublishError>;

    async fn publish_notification(&self, envelope: &Envelope) -> Result<(), PublishError>;

    async fn send_request(&self, envelope: &Envelope) -> Result<(), PublishError>;
}
