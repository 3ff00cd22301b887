//! App - アプリケーション層
//!
//! このモジュールは、ports と journal を組み合わせてエンジンとランタイムを実装します。
//!
//! # 主要コンポーネント
//! - **AggregateEngine**: 1 つの aggregate key のターン（submit / process / publish）
//! - **Schedule**: ターン終了時の timer / reminder の計画
//! - **ActorRuntime**: key ごとの actor と mailbox、wake の振り分け
//! - **ReminderLoop**: durable reminder の発火
//! - **RuntimeBuilder**: ランタイムの構築とワイヤリング

pub mod activation;
pub mod builder;
pub mod config;
pub mod engine;
pub mod reminder_loop;
pub mod runtime;
pub mod runtime_scheduler;
pub mod schedule;
pub mod status;

// 主要な型を再エクスポート
pub use self::activation::Activation;
pub use self::builder::{BuildError, RuntimeBuilder};
pub use self::config::{ConfigError, EngineConfig, RuntimeConfig};
pub use self::engine::{AggregateEngine, EngineDeps};
pub use self::reminder_loop::ReminderLoop;
pub use self::runtime::ActorRuntime;
pub use self::runtime_scheduler::{RuntimeScheduler, Wake};
pub use self::schedule::ScheduleAction;
pub use self::status::ActorStatus;
