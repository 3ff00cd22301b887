//! spindle-core
//!
//! Event-sourced aggregates run as durable, per-key sequential actors.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, policy, processor, actor_state, aggregate）
//! - **ports**: 抽象化レイヤー（StateStore, CommandHandler, MessageBus, Scheduler, など）
//! - **journal**: StateStore 上の per-aggregate ログとターン単位のトランザクション
//! - **app**: エンジンとランタイム（engine, schedule, runtime, reminder_loop, builder）
//! - **impls**: 実装（InMemoryStateStore など開発用）
//! - **error**: ターンを中断させるエラー

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod journal;
pub mod ports;

pub use app::{ActorRuntime, AggregateEngine, RuntimeBuilder};
pub use error::EngineError;
