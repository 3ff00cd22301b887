//! ActorRuntime - aggregate key ごとの worker pool
//!
//! # 構成
//! - key ごとに 1 つの actor タスク（mailbox は `mpsc`）。同じ key のターンは
//!   必ずこの 1 タスクの中で直列に走る
//! - dispatcher: timer / reminder の wake を actor の mailbox に流す
//! - reminder loop: ReminderTable を定期的に読む
//!
//! # ライフサイクル
//! - 最初のメッセージで actor を起動（activate）
//! - `idle_timeout` の間なにも来なければ mailbox を閉じ、積まれていた分を
//!   処理してから終了（deactivate）
//! - 閉じた mailbox に送ろうとしたら新しい actor を起動する。新しい actor は
//!   前の actor の終了を待ってから動き出す
//! - 終了した actor は exit を通知し、dispatcher が表から取り除く
//!
//! dispatcher は共有ループなので mailbox への送信で待たない。満杯の mailbox
//! への wake は捨てる（積まれている分のターンと reminder が後を引き継ぐ）

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::domain::{Aggregate, AggregateKey, Envelope};
use crate::error::EngineError;
use crate::ports::{ReminderTable, WakeKind};

use super::activation::Activation;
use super::config::RuntimeConfig;
use super::engine::{AggregateEngine, EngineDeps};
use super::reminder_loop::ReminderLoop;
use super::runtime_scheduler::{RuntimeScheduler, Wake};
use super::status::ActorStatus;

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

enum ActorMessage {
    Submit {
        batch: Vec<Envelope>,
        reply: Reply<u64>,
    },
    Wake(WakeKind),
    Snapshot {
        reply: Reply<Option<Envelope>>,
    },
    Status {
        reply: Reply<ActorStatus>,
    },
}

struct ActorHandle {
    generation: u64,
    mailbox: mpsc::Sender<ActorMessage>,
    join: JoinHandle<()>,
}

/// Sent by an actor once it has drained its mailbox and is about to return.
struct Exit {
    key: AggregateKey,
    generation: u64,
}

struct Pool<A: Aggregate> {
    deps: EngineDeps<A>,
    scheduler: Arc<RuntimeScheduler>,
    config: RuntimeConfig,
    actors: Mutex<HashMap<AggregateKey, ActorHandle>>,
    generations: AtomicU64,
    exits: mpsc::UnboundedSender<Exit>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Handle of a running pool of aggregate actors.
///
/// - `shutdown_and_join()` stops the loops and waits for every actor to
///   drain its mailbox
pub struct ActorRuntime<A: Aggregate> {
    pool: Arc<Pool<A>>,
    shutdown_tx: watch::Sender<bool>,
    loops: Vec<JoinHandle<()>>,
}

impl<A: Aggregate> ActorRuntime<A> {
    /// Spawn the dispatcher and reminder loops. Must run inside a Tokio runtime.
    pub fn start(
        deps: EngineDeps<A>,
        reminders: Arc<dyn ReminderTable>,
        config: RuntimeConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let scheduler = Arc::new(RuntimeScheduler::new(
            wake_tx.clone(),
            Arc::clone(&reminders),
            Arc::clone(&deps.clock),
        ));
        let reminder_loop = ReminderLoop::new(
            reminders,
            Arc::clone(&deps.clock),
            wake_tx,
            config.reminder_poll_interval,
        );

        let pool = Arc::new(Pool {
            deps,
            scheduler,
            config,
            actors: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
            exits: exit_tx,
            shutdown_rx: shutdown_rx.clone(),
        });

        let loops = vec![
            tokio::spawn(dispatch_loop(
                Arc::clone(&pool),
                wake_rx,
                exit_rx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(reminder_loop.run(shutdown_rx)),
        ];
        info!(aggregate = A::NAME, "actor runtime started");

        Self {
            pool,
            shutdown_tx,
            loops,
        }
    }

    /// Append a command batch to the key's command log. Returns the new count.
    pub async fn submit(&self, key: &AggregateKey, batch: Vec<Envelope>) -> Result<u64, EngineError> {
        self.pool
            .request(key, |reply| ActorMessage::Submit { batch, reply })
            .await
    }

    pub async fn snapshot(&self, key: &AggregateKey) -> Result<Option<Envelope>, EngineError> {
        self.pool
            .request(key, |reply| ActorMessage::Snapshot { reply })
            .await
    }

    pub async fn status(&self, key: &AggregateKey) -> Result<ActorStatus, EngineError> {
        self.pool
            .request(key, |reply| ActorMessage::Status { reply })
            .await
    }

    /// Enqueue a wake-up without waiting for the turn.
    pub async fn wake(&self, key: &AggregateKey, kind: WakeKind) -> Result<(), EngineError> {
        self.pool.deliver(key, ActorMessage::Wake(kind)).await
    }

    /// Number of actors currently activated.
    pub async fn active_actors(&self) -> usize {
        let actors = self.pool.actors.lock().await;
        actors.values().filter(|h| !h.mailbox.is_closed()).count()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for the loops and every actor.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.loops {
            let _ = join.await;
        }
        let actors: Vec<ActorHandle> = {
            let mut actors = self.pool.actors.lock().await;
            actors.drain().map(|(_, handle)| handle).collect()
        };
        for handle in actors {
            let _ = handle.join.await;
        }
        info!(aggregate = A::NAME, "actor runtime stopped");
    }
}

impl<A: Aggregate> Pool<A> {
    async fn request<T>(
        &self,
        key: &AggregateKey,
        message: impl FnOnce(Reply<T>) -> ActorMessage,
    ) -> Result<T, EngineError> {
        let (reply, response) = oneshot::channel();
        self.deliver(key, message(reply)).await?;
        response
            .await
            .map_err(|_| EngineError::ActorUnavailable(key.clone()))?
    }

    /// Put `message` in the key's mailbox, activating an actor if needed.
    async fn deliver(&self, key: &AggregateKey, mut message: ActorMessage) -> Result<(), EngineError> {
        // a mailbox may close between lookup and send when its actor idles out
        for _ in 0..3 {
            let mailbox = self.mailbox(key).await?;
            match mailbox.send(message).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => message = returned,
            }
        }
        Err(EngineError::ActorUnavailable(key.clone()))
    }

    /// Hand a timer or reminder wake to the key's actor without waiting.
    ///
    /// A full mailbox already holds turns for this key, and the durable
    /// reminder fires again while work remains, so the wake is dropped.
    async fn offer_wake(&self, key: &AggregateKey, kind: WakeKind) -> Result<(), EngineError> {
        let mut message = ActorMessage::Wake(kind);
        for _ in 0..3 {
            let mailbox = self.mailbox(key).await?;
            match mailbox.try_send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(aggregate = %key, %kind, "mailbox full, wake-up dropped");
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(returned)) => message = returned,
            }
        }
        Err(EngineError::ActorUnavailable(key.clone()))
    }

    /// Remove the entry of an actor that has exited, unless it was replaced.
    async fn forget(&self, exit: Exit) {
        let mut actors = self.actors.lock().await;
        if actors
            .get(&exit.key)
            .is_some_and(|handle| handle.generation == exit.generation)
        {
            // the actor drained before reporting, so a successor need not wait for it
            actors.remove(&exit.key);
            debug!(aggregate = %exit.key, "actor deactivated");
        }
    }

    async fn mailbox(&self, key: &AggregateKey) -> Result<mpsc::Sender<ActorMessage>, EngineError> {
        if *self.shutdown_rx.borrow() {
            return Err(EngineError::ActorUnavailable(key.clone()));
        }

        let mut actors = self.actors.lock().await;
        if let Some(handle) = actors.get(key)
            && !handle.mailbox.is_closed()
        {
            return Ok(handle.mailbox.clone());
        }

        let engine = AggregateEngine::new(
            key.clone(),
            self.deps.clone(),
            self.scheduler.clone(),
            self.config.engine.clone(),
        )?;
        let previous = actors.remove(key).map(|handle| handle.join);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (mailbox, inbox) = mpsc::channel(self.config.mailbox_capacity);
        let join = tokio::spawn(run_actor(
            engine,
            inbox,
            previous,
            self.config.idle_timeout,
            self.shutdown_rx.clone(),
            ActorExit {
                exits: self.exits.clone(),
                generation,
            },
        ));
        debug!(aggregate = %key, generation, "actor activated");
        actors.insert(
            key.clone(),
            ActorHandle {
                generation,
                mailbox: mailbox.clone(),
                join,
            },
        );
        Ok(mailbox)
    }
}

async fn dispatch_loop<A: Aggregate>(
    pool: Arc<Pool<A>>,
    mut wakes: mpsc::UnboundedReceiver<Wake>,
    mut exits: mpsc::UnboundedReceiver<Exit>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let wake = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            Some(exit) = exits.recv() => {
                pool.forget(exit).await;
                continue;
            }
            wake = wakes.recv() => wake,
        };
        let Some(wake) = wake else {
            break;
        };

        if let Err(err) = pool.offer_wake(&wake.key, wake.kind).await {
            error!(aggregate = %wake.key, kind = %wake.kind, error = %err, "wake-up dropped");
        }
    }
}

struct ActorExit {
    exits: mpsc::UnboundedSender<Exit>,
    generation: u64,
}

async fn run_actor<A: Aggregate>(
    engine: AggregateEngine<A>,
    mut inbox: mpsc::Receiver<ActorMessage>,
    previous: Option<JoinHandle<()>>,
    idle_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    exit: ActorExit,
) {
    // one actor per key at a time: let the previous activation finish first
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut act = Activation::new();
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let message = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(idle_timeout) => {
                debug!(aggregate = %engine.key(), "actor idle, deactivating");
                break;
            }
            message = inbox.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        handle(&engine, &mut act, message).await;
    }

    inbox.close();
    while let Some(message) = inbox.recv().await {
        handle(&engine, &mut act, message).await;
    }

    // ignore send error: the dispatcher is gone after shutdown
    let _ = exit.exits.send(Exit {
        key: engine.key().clone(),
        generation: exit.generation,
    });
}

async fn handle<A: Aggregate>(engine: &AggregateEngine<A>, act: &mut Activation<A>, message: ActorMessage) {
    match message {
        ActorMessage::Submit { batch, reply } => {
            let _ = reply.send(engine.submit_command(act, batch).await);
        }
        ActorMessage::Snapshot { reply } => {
            let _ = reply.send(engine.get_snapshot_event(act).await);
        }
        ActorMessage::Status { reply } => {
            let _ = reply.send(engine.status(act).await);
        }
        ActorMessage::Wake(kind) => {
            // the next timer or reminder retries
            if let Err(err) = engine.on_wake(act, kind).await {
                error!(aggregate = %engine.key(), %kind, error = %err, "turn failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicU32;

    use tokio::sync::Notify;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    use crate::app::EngineConfig;
    use crate::app::engine::ACTOR_STATE_KEY;
    use crate::domain::aggregate::testing::Counter;
    use crate::domain::{CorrelationId, MessageId, MessageKind, Metadata, Payload};
    use crate::impls::{InMemoryBus, InMemoryReminderTable, InMemoryStateStore};
    use crate::journal::{MESSAGE_LOG, StateTransaction};
    use crate::ports::{
        CommandHandler, HandlerError, HandlerOutput, Reminder, StateStore, SystemClock,
        UlidGenerator,
    };

    #[derive(Default)]
    struct IncrementHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CommandHandler<Counter> for IncrementHandler {
        async fn dispatch(
            &self,
            command: &Payload,
            _metadata: &Metadata,
            _aggregate: &Counter,
        ) -> Result<HandlerOutput, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let by = command.body["by"].as_i64().unwrap_or(1);
            Ok(HandlerOutput::new().event(Payload::event("Incremented", json!({ "by": by }))))
        }
    }

    struct Fixture {
        runtime: ActorRuntime<Counter>,
        store: Arc<InMemoryStateStore>,
        bus: Arc<InMemoryBus>,
        reminders: Arc<InMemoryReminderTable>,
    }

    /// Blocks the first command of aggregate `a` until released.
    #[derive(Default)]
    struct GateHandler {
        entered: Notify,
        release: Notify,
        blocked: AtomicBool,
    }

    #[async_trait]
    impl CommandHandler<Counter> for GateHandler {
        async fn dispatch(
            &self,
            _command: &Payload,
            metadata: &Metadata,
            _aggregate: &Counter,
        ) -> Result<HandlerOutput, HandlerError> {
            if metadata.aggregate.id.as_str() == "a" && !self.blocked.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(HandlerOutput::new().event(Payload::event("Incremented", json!({ "by": 1 }))))
        }
    }

    fn fixture(idle_timeout: Duration) -> Fixture {
        fixture_with(
            Arc::new(IncrementHandler::default()),
            RuntimeConfig {
                engine: EngineConfig::default(),
                mailbox_capacity: 8,
                idle_timeout,
                reminder_poll_interval: Duration::from_millis(10),
            },
        )
    }

    fn fixture_with(handler: Arc<dyn CommandHandler<Counter>>, config: RuntimeConfig) -> Fixture {
        let store = Arc::new(InMemoryStateStore::new());
        let bus = Arc::new(InMemoryBus::new());
        let reminders = Arc::new(InMemoryReminderTable::new());
        let deps = EngineDeps {
            store: store.clone(),
            handler,
            bus: bus.clone(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
        };
        Fixture {
            runtime: ActorRuntime::start(deps, reminders.clone(), config),
            store,
            bus,
            reminders,
        }
    }

    fn command(key: &AggregateKey, by: i64) -> Envelope {
        Envelope::new(
            Payload::command("Increment", json!({ "by": by })),
            Metadata::new(
                MessageId::from_ulid(Ulid::new()),
                CorrelationId::from_ulid(Ulid::new()),
                key.clone(),
                Utc::now(),
            ),
        )
    }

    async fn wait_until_drained(runtime: &ActorRuntime<Counter>, key: &AggregateKey) -> ActorStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let status = runtime.status(key).await.unwrap();
            if status.is_drained() && status.message_count > 0 {
                return status;
            }
            assert!(tokio::time::Instant::now() < deadline, "not drained: {status:?}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn submitted_commands_are_processed_and_published() {
        let f = fixture(Duration::from_secs(60));
        let key = AggregateKey::new("Counter", "c-1");
        let batch = vec![command(&key, 1), command(&key, 2), command(&key, 3)];

        assert_eq!(f.runtime.submit(&key, batch).await.unwrap(), 3);
        let status = wait_until_drained(&f.runtime, &key).await;

        assert_eq!(status.last_command_processed, 3);
        assert_eq!(status.event_source_count, 3);
        assert!(!status.process_reminder_registered);
        assert!(!status.publish_reminder_registered);
        assert_eq!(f.bus.delivered_of(MessageKind::Event).await.len(), 3);
        assert!(f.reminders.is_empty().await);

        let snapshot = f.runtime.snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.payload.body["value"], 6);
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn keys_run_independently() {
        let f = fixture(Duration::from_secs(60));
        let a = AggregateKey::new("Counter", "a");
        let b = AggregateKey::new("Counter", "b");

        f.runtime.submit(&a, vec![command(&a, 1)]).await.unwrap();
        f.runtime.submit(&b, vec![command(&b, 5), command(&b, 5)]).await.unwrap();

        assert_eq!(wait_until_drained(&f.runtime, &a).await.event_source_count, 1);
        assert_eq!(wait_until_drained(&f.runtime, &b).await.event_source_count, 2);
        assert_eq!(f.runtime.active_actors().await, 2);
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn idle_actor_deactivates_and_comes_back_from_store() {
        let f = fixture(Duration::from_millis(50));
        let key = AggregateKey::new("Counter", "c-1");
        f.runtime.submit(&key, vec![command(&key, 2)]).await.unwrap();
        wait_until_drained(&f.runtime, &key).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.runtime.active_actors().await, 0);

        let status = f.runtime.status(&key).await.unwrap();
        assert_eq!(status.last_command_processed, 1);
        let snapshot = f.runtime.snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.payload.body["value"], 2);
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn idle_actors_leave_the_pool() {
        let f = fixture(Duration::from_millis(30));
        for i in 0..20 {
            let key = AggregateKey::new("Counter", format!("c-{i}"));
            f.runtime.status(&key).await.unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !f.runtime.pool.actors.lock().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "idle actors never removed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // a forgotten key activates again
        let key = AggregateKey::new("Counter", "c-0");
        f.runtime.submit(&key, vec![command(&key, 4)]).await.unwrap();
        assert_eq!(wait_until_drained(&f.runtime, &key).await.last_command_processed, 1);
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_key_does_not_hold_up_wakes_for_others() {
        let handler = Arc::new(GateHandler::default());
        let f = fixture_with(
            handler.clone(),
            RuntimeConfig {
                engine: EngineConfig::default(),
                mailbox_capacity: 1,
                idle_timeout: Duration::from_secs(60),
                reminder_poll_interval: Duration::from_millis(10),
            },
        );
        let a = AggregateKey::new("Counter", "a");
        let b = AggregateKey::new("Counter", "b");

        f.runtime.submit(&a, vec![command(&a, 1)]).await.unwrap();
        handler.entered.notified().await;
        // a is stuck in its turn; one more message fills its mailbox
        f.runtime.wake(&a, WakeKind::Process).await.unwrap();
        f.reminders
            .upsert(Reminder {
                key: a.clone(),
                kind: WakeKind::Process,
                next_fire_at: Utc::now(),
                period: Duration::from_secs(60),
            })
            .await
            .unwrap();

        f.runtime.submit(&b, vec![command(&b, 1)]).await.unwrap();
        let status = wait_until_drained(&f.runtime, &b).await;
        assert_eq!(status.last_command_processed, 1);

        handler.release.notify_one();
        assert_eq!(wait_until_drained(&f.runtime, &a).await.last_command_processed, 1);
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn reminder_resumes_work_left_in_the_store() {
        let f = fixture(Duration::from_secs(60));
        let key = AggregateKey::new("Counter", "c-1");

        // as if a previous process appended a message and died before publishing
        let mut tx = StateTransaction::new(f.store.as_ref(), key.clone());
        let message = Envelope::new(
            Payload::notification("Hello", json!({})),
            Metadata::new(
                MessageId::from_ulid(Ulid::new()),
                CorrelationId::from_ulid(Ulid::new()),
                key.clone(),
                Utc::now(),
            ),
        );
        let count = MESSAGE_LOG.append(&mut tx, vec![message], 0).await.unwrap();
        let state = crate::domain::ActorState {
            message_count: count,
            publish_reminder_due_time: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        tx.set(ACTOR_STATE_KEY, &state).unwrap();
        tx.commit().await.unwrap();
        f.reminders
            .upsert(Reminder {
                key: key.clone(),
                kind: WakeKind::Publish,
                next_fire_at: Utc::now(),
                period: Duration::from_secs(60),
            })
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while f.bus.delivered().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "reminder never fired");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.bus.delivered_of(MessageKind::Notification).await.len(), 1);
        let status = wait_until_drained(&f.runtime, &key).await;
        assert!(!status.publish_reminder_registered);
        assert!(f.store.try_get(&key, "Message1").await.unwrap().is_some());
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn wrong_aggregate_type_is_refused() {
        let f = fixture(Duration::from_secs(60));
        let key = AggregateKey::new("Invoice", "i-1");

        let err = f.runtime.submit(&key, vec![command(&key, 1)]).await.unwrap_err();
        assert!(matches!(err, EngineError::AggregateType { .. }));
        assert_eq!(f.runtime.active_actors().await, 0);
        f.runtime.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_refused() {
        let f = fixture(Duration::from_secs(60));
        let key = AggregateKey::new("Counter", "c-1");
        f.runtime.request_shutdown();

        let err = f.runtime.status(&key).await.unwrap_err();
        assert!(matches!(err, EngineError::ActorUnavailable(_)));
        f.runtime.shutdown_and_join().await;
    }
}
