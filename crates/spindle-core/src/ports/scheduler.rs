//! Scheduler port - 継続実行のための 2 段構えのウェイクアップ
//!
//! - timer: プロセス内の one-shot 遅延。自動では繰り返さないので、
//!   毎ターン明示的に張り直す
//! - reminder: durable な周期ウェイクアップ。プロセス再起動や actor の
//!   非活性化を越えて残る（timer が失われたときの保険）
//!
//! どちらも同じ actor の mailbox に wake を積むだけなので、追加のロックは
//! 不要です。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::AggregateKey;

/// Which loop a wake-up drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WakeKind {
    Process,
    Publish,
}

impl fmt::Display for WakeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WakeKind::Process => f.write_str("process"),
            WakeKind::Publish => f.write_str("publish"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("reminder table unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Arm a one-shot in-process timer.
    async fn arm_timer(&self, key: &AggregateKey, kind: WakeKind, due: Duration);

    /// Register (or replace) the durable reminder of `kind` for `key`.
    async fn register_reminder(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
        due: Duration,
        period: Duration,
    ) -> Result<(), SchedulerError>;

    async fn unregister_reminder(
        &self,
        key: &AggregateKey,
        kind: WakeKind,
    ) -> Result<(), SchedulerError>;
}
