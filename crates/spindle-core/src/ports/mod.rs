//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait はエンジンの外側（永続化、業務ロジック、バス、時刻）への
//! インターフェースで、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - StateStore が source of truth（カーソル・ログ・TaskProcessor）
//! - ReminderTable は「いつ起こすか」だけを持つ
//! - CommandHandler / MessageBus はエンジンから見て純粋な協力者

pub mod bus;
pub mod clock;
pub mod handler;
pub mod id_generator;
pub mod reminder_table;
pub mod scheduler;
pub mod state_store;

// 主要な trait を再エクスポート
pub use self::bus::{MessageBus, PublishError};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::{CommandHandler, HandlerError, HandlerOutput};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::reminder_table::{Reminder, ReminderTable};
pub use self::scheduler::{Scheduler, SchedulerError, WakeKind};
pub use self::state_store::{StateStore, StoreError};
