//! RuntimeBuilder - ランタイムの構築とワイヤリング
//!
//! store / handler / bus を受け取り、足りない部分（clock, id 生成, reminder 表）
//! を既定の実装で埋めてから `ActorRuntime` を起動します。

use std::sync::Arc;

use crate::domain::Aggregate;
use crate::impls::InMemoryReminderTable;
use crate::ports::{
    Clock, CommandHandler, IdGenerator, MessageBus, ReminderTable, StateStore, SystemClock,
    UlidGenerator,
};

use super::config::RuntimeConfig;
use super::engine::EngineDeps;
use super::runtime::ActorRuntime;

/// RuntimeBuilder は ActorRuntime を構築
///
/// # 使用例
/// ```ignore
/// let runtime = RuntimeBuilder::<Counter>::new()
///     .store(store)
///     .handler(CounterHandler)
///     .bus(bus)
///     .build()?;
/// ```
///
/// store / handler / bus が欠けていれば、不足分を全部並べた
/// `BuildError::MissingComponents` を返す。clock / ids / reminders は省略時に
/// SystemClock, ULID, in-memory 表になる。
pub struct RuntimeBuilder<A: Aggregate> {
    store: Option<Arc<dyn StateStore>>,
    handler: Option<Arc<dyn CommandHandler<A>>>,
    bus: Option<Arc<dyn MessageBus>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    reminders: Option<Arc<dyn ReminderTable>>,
    config: RuntimeConfig,
}

/// BuildError はランタイム構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These must be provided before build().")]
    MissingComponents(Vec<&'static str>),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl<A: Aggregate> RuntimeBuilder<A> {
    pub fn new() -> Self {
        Self {
            store: None,
            handler: None,
            bus: None,
            clock: None,
            ids: None,
            reminders: None,
            config: RuntimeConfig::default(),
        }
    }

    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn handler(mut self, handler: impl CommandHandler<A> + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn shared_handler(mut self, handler: Arc<dyn CommandHandler<A>>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn reminders(mut self, reminders: Arc<dyn ReminderTable>) -> Self {
        self.reminders = Some(reminders);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// 検証してから ActorRuntime を起動する（Tokio runtime の中で呼ぶこと）
    ///
    /// # 検証
    /// - store / handler / bus が全て揃っているか
    /// - mailbox_capacity と reminder_poll_interval が 0 でないか
    pub fn build(self) -> Result<ActorRuntime<A>, BuildError> {
        let deps = self.deps()?;
        let reminders = self
            .reminders
            .unwrap_or_else(|| Arc::new(InMemoryReminderTable::new()));
        Ok(ActorRuntime::start(deps, reminders, self.config))
    }

    fn deps(&self) -> Result<EngineDeps<A>, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.handler.is_none() {
            missing.push("handler");
        }
        if self.bus.is_none() {
            missing.push("bus");
        }

        let (Some(store), Some(handler), Some(bus)) = (&self.store, &self.handler, &self.bus) else {
            return Err(BuildError::MissingComponents(missing));
        };

        if self.config.mailbox_capacity == 0 {
            return Err(BuildError::InvalidConfig("mailbox_capacity must be at least 1".into()));
        }
        if self.config.reminder_poll_interval.is_zero() {
            return Err(BuildError::InvalidConfig("reminder_poll_interval must be positive".into()));
        }

        let clock = self
            .clock
            .clone()
            .unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .clone()
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        Ok(EngineDeps {
            store: Arc::clone(store),
            handler: Arc::clone(handler),
            bus: Arc::clone(bus),
            clock,
            ids,
        })
    }
}

impl<A: Aggregate> Default for RuntimeBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}
