//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の in-memory 実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryStateStore**: staged / committed を分けた StateStore
//! - **InMemoryBus**: 配送を記録する MessageBus（失敗注入つき）
//! - **InMemoryReminderTable**: reminder 表
//! - **RecordingScheduler**: 呼び出しを記録するだけの Scheduler

pub mod inmem_bus;
pub mod inmem_reminders;
pub mod inmem_store;
pub mod recording_scheduler;

// 主要な型を再エクスポート
pub use self::inmem_bus::InMemoryBus;
pub use self::inmem_reminders::InMemoryReminderTable;
pub use self::inmem_store::InMemoryStateStore;
pub use self::recording_scheduler::{RecordingScheduler, ScheduleCall};
