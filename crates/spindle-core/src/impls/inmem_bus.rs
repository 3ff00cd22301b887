//! InMemoryBus - 配送された envelope を種類ごとに記録するバス
//!
//! `fail_next(n)` で次の n 回の配送を失敗させられるので、publish ループの
//! リトライ挙動をテストできます。

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{Envelope, MessageKind};
use crate::ports::{MessageBus, PublishError};

#[derive(Default)]
pub struct InMemoryBus {
    delivered: Mutex<Vec<Envelope>>,
    remaining_failures: AtomicU32,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` publish calls, whatever their kind.
    pub fn fail_next(&self, n: u32) {
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<Envelope> {
        self.delivered.lock().await.clone()
    }

    pub async fn delivered_of(&self, kind: MessageKind) -> Vec<Envelope> {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|e| e.kind() == kind)
            .cloned()
            .collect()
    }

    async fn deliver(&self, envelope: &Envelope) -> Result<(), PublishError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PublishError(format!(
                "injected failure for {} #{}",
                envelope.payload.name, envelope.sequence_number
            )));
        }
        self.delivered.lock().await.push(envelope.clone());
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_event(&self, envelope: &Envelope) -> Result<(), PublishError> {
        self.deliver(envelope).await
    }

    async fn send_command(&self, envelope: &Envelope) -> Result<(), PublishError> {
        self.deliver(envelope).await
    }

    async fn publish_notification(&self, envelope: &Envelope) -> Result<(), PublishError> {
        self.deliver(envelope).await
    }

    async fn send_request(&self, envelope: &Envelope) -> Result<(), PublishError> {
        self.deliver(envelope).await
    }
}
