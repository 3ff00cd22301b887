//! AggregateEngine - 1 つの aggregate key に対する処理エンジン
//!
//! # ターン
//! 公開メソッドはどれも 1 ターンで、同じ key に対しては直列にしか呼ばれない
//! 前提です（ランタイムの actor が保証）。ターンの中では：
//! 1. ActorState を読む（Activation にあればそれを使う）
//! 2. 仕事を 1 つだけ進め、書き込みは StateTransaction に積む
//! 3. 次のウェイクアップを計画して Scheduler に反映
//! 4. commit（ここで初めて state store に書かれる）
//!
//! エラーで抜けたターンは何も残さず、Activation も捨てます。次のウェイク
//! アップが同じカーソルからやり直します。

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::{
    ActorState, Aggregate, AggregateKey, Envelope, MessageKind, Metadata, Payload, TaskProcessor,
    TaskStatus,
};
use crate::error::EngineError;
use crate::journal::{COMMAND_LOG, EVENT_LOG, MESSAGE_LOG, StateTransaction};
use crate::ports::{
    Clock, CommandHandler, HandlerError, IdGenerator, MessageBus, PublishError, Scheduler,
    StateStore, StoreError, WakeKind,
};

use super::activation::Activation;
use super::config::EngineConfig;
use super::schedule::{self, ScheduleAction};
use super::status::ActorStatus;

pub const ACTOR_STATE_KEY: &str = "ActorState";

/// Notification emitted once when a command is canceled for good.
pub const COMMAND_FAILED: &str = "CommandFailed";

/// Notification emitted when a failed command is suspended for a retry.
pub const COMMAND_RETRY_SCHEDULED: &str = "CommandRetryScheduled";

pub fn processor_key(sequence: u64) -> String {
    format!("TaskProcessor{sequence}")
}

/// Collaborators shared by every engine of one aggregate type.
pub struct EngineDeps<A: Aggregate> {
    pub store: Arc<dyn StateStore>,
    pub handler: Arc<dyn CommandHandler<A>>,
    pub bus: Arc<dyn MessageBus>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl<A: Aggregate> Clone for EngineDeps<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handler: Arc::clone(&self.handler),
            bus: Arc::clone(&self.bus),
            clock: Arc::clone(&self.clock),
            ids: Arc::clone(&self.ids),
        }
    }
}

enum Delivery {
    Published,
    Failed(PublishError),
    Unpublishable,
}

pub struct AggregateEngine<A: Aggregate> {
    key: AggregateKey,
    deps: EngineDeps<A>,
    scheduler: Arc<dyn Scheduler>,
    config: EngineConfig,
}

impl<A: Aggregate> AggregateEngine<A> {
    pub fn new(
        key: AggregateKey,
        deps: EngineDeps<A>,
        scheduler: Arc<dyn Scheduler>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        if key.name.as_str() != A::NAME {
            return Err(EngineError::AggregateType {
                expected: A::NAME,
                key,
            });
        }
        Ok(Self {
            key,
            deps,
            scheduler,
            config,
        })
    }

    pub fn key(&self) -> &AggregateKey {
        &self.key
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Append a batch to the command log and arm processing.
    ///
    /// Every envelope must target this actor. Returns the new command count.
    pub async fn submit_command(
        &self,
        act: &mut Activation<A>,
        batch: Vec<Envelope>,
    ) -> Result<u64, EngineError> {
        let span = info_span!("submit_command", aggregate = %self.key, size = batch.len());
        let result = self.submit_turn(act, batch).instrument(span).await;
        self.settle(act, result)
    }

    /// Run the next pending command, if any. Returns whether commands remain.
    pub async fn process_next_command(&self, act: &mut Activation<A>) -> Result<bool, EngineError> {
        let span = info_span!("process_next_command", aggregate = %self.key);
        let result = self.process_turn(act).instrument(span).await;
        self.settle(act, result)
    }

    /// Publish the next pending message, if any. Returns whether messages remain.
    ///
    /// Bus failures never fail the turn: they are recorded on the actor
    /// state and retried later.
    pub async fn publish_next_message(&self, act: &mut Activation<A>) -> Result<bool, EngineError> {
        let span = info_span!("publish_next_message", aggregate = %self.key);
        let result = self.publish_turn(act).instrument(span).await;
        self.settle(act, result)
    }

    /// Current aggregate state as a point-in-time event, `None` until the
    /// aggregate has seen its first event.
    pub async fn get_snapshot_event(
        &self,
        act: &mut Activation<A>,
    ) -> Result<Option<Envelope>, EngineError> {
        let span = info_span!("get_snapshot_event", aggregate = %self.key);
        let result = self.snapshot_turn(act).instrument(span).await;
        self.settle(act, result)
    }

    pub async fn status(&self, act: &mut Activation<A>) -> Result<ActorStatus, EngineError> {
        let tx = self.transaction();
        let result = self.load_state(&tx, act).await.map(|state| {
            let status = ActorStatus::from_state(self.key.clone(), &state);
            act.state = Some(state);
            status
        });
        self.settle(act, result)
    }

    /// Timer / reminder entry point for the process loop.
    pub async fn process_callback(&self, act: &mut Activation<A>) -> Result<bool, EngineError> {
        debug!(aggregate = %self.key, "process wake-up");
        self.process_next_command(act).await
    }

    /// Timer / reminder entry point for the publish loop.
    pub async fn publish_callback(&self, act: &mut Activation<A>) -> Result<bool, EngineError> {
        debug!(aggregate = %self.key, "publish wake-up");
        self.publish_next_message(act).await
    }

    pub async fn on_wake(&self, act: &mut Activation<A>, kind: WakeKind) -> Result<bool, EngineError> {
        match kind {
            WakeKind::Process => self.process_callback(act).await,
            WakeKind::Publish => self.publish_callback(act).await,
        }
    }

    async fn submit_turn(
        &self,
        act: &mut Activation<A>,
        batch: Vec<Envelope>,
    ) -> Result<u64, EngineError> {
        for envelope in &batch {
            self.ensure_key(envelope.aggregate())?;
        }

        let now = self.deps.clock.now();
        let mut tx = self.transaction();
        let loaded = self.load_state(&tx, act).await?;
        let mut state = loaded.clone();

        let batch = batch
            .into_iter()
            .map(|mut envelope| {
                envelope.metadata.received_at = Some(now);
                envelope
            })
            .collect();
        state.command_count = COMMAND_LOG.append(&mut tx, batch, state.command_count).await?;
        info!(commands = state.command_count, "commands accepted");

        let plan = schedule::plan_process(&mut state, &self.config, now);
        let count = state.command_count;
        self.finish(tx, act, &loaded, state, &plan).await?;
        Ok(count)
    }

    async fn process_turn(&self, act: &mut Activation<A>) -> Result<bool, EngineError> {
        let now = self.deps.clock.now();
        let mut tx = self.transaction();
        let loaded = self.load_state(&tx, act).await?;
        let mut state = loaded.clone();

        if !state.has_pending_commands() {
            let plan = schedule::plan_process(&mut state, &self.config, now);
            self.finish(tx, act, &loaded, state, &plan).await?;
            return Ok(false);
        }

        let sequence = state.next_command_sequence();
        let command = COMMAND_LOG.get(&tx, sequence).await?;
        self.ensure_key(command.aggregate())?;
        let mut aggregate = self.load_aggregate(&tx, act, state.event_source_count).await?;

        let processor_key = processor_key(sequence);
        let stored: Option<TaskProcessor> = tx.get(&processor_key).await?;
        let mut processor = stored
            .clone()
            .unwrap_or_else(|| TaskProcessor::new(self.config.resiliency.clone(), now));
        let mut outbox = Vec::new();

        if processor.status.is_terminal() {
            // A previous turn finished this command but the cursor did not move.
            warn!(sequence, status = ?processor.status, "command already settled, advancing cursor");
            state.last_command_processed = sequence;
            state.clear_retry();
        } else {
            if processor.status == TaskStatus::New {
                processor.start(now)?;
            }
            if processor.status == TaskStatus::Suspended {
                processor.resume(now)?;
            }

            match processor.status {
                TaskStatus::Active => {
                    let result = self
                        .deps
                        .handler
                        .dispatch(&command.payload, &command.metadata, &aggregate)
                        .await;
                    match result {
                        Ok(output) => {
                            let events: Vec<Envelope> = output
                                .source_events
                                .into_iter()
                                .map(|payload| self.caused_by(&command, payload, now))
                                .collect();
                            for event in &events {
                                aggregate.apply(&event.payload)?;
                            }
                            outbox.extend(events.iter().filter(|e| !e.payload.internal).cloned());
                            outbox.extend(
                                output
                                    .integration_messages
                                    .into_iter()
                                    .map(|payload| self.caused_by(&command, payload, now)),
                            );

                            let produced = events.len();
                            state.event_source_count =
                                EVENT_LOG.append(&mut tx, events, state.event_source_count).await?;
                            processor.complete(now)?;
                            state.last_command_processed = sequence;
                            state.clear_retry();
                            info!(sequence, events = produced, "command completed");
                        }
                        Err(HandlerError::Rejected {
                            message,
                            technical_error,
                        }) => {
                            processor.fail(message, technical_error, now)?;
                            self.record_failure(&command, &processor, &mut state, &mut outbox, now);
                        }
                        Err(HandlerError::Fault(source)) => {
                            return Err(EngineError::HandlerFault {
                                aggregate: self.key.clone(),
                                sequence,
                                source,
                            });
                        }
                    }
                }
                TaskStatus::Suspended => {
                    debug!(sequence, retry_at = ?processor.next_retry_time(), "command not due yet");
                    state.retry_on_failure_date_time = processor.next_retry_time();
                }
                // resume ran out of time
                TaskStatus::Canceled => {
                    self.record_failure(&command, &processor, &mut state, &mut outbox, now);
                }
                // start and resume never leave a task here
                TaskStatus::New | TaskStatus::Completed => {}
            }
        }

        if !outbox.is_empty() {
            state.message_count = MESSAGE_LOG.append(&mut tx, outbox, state.message_count).await?;
        }
        if stored.as_ref() != Some(&processor) {
            tx.set(&processor_key, &processor)?;
        }

        let mut plan = schedule::plan_process(&mut state, &self.config, now);
        if state.message_count > loaded.message_count {
            plan.extend(schedule::plan_publish(&mut state, &self.config));
        }
        let remaining = state.has_pending_commands();
        self.finish(tx, act, &loaded, state, &plan).await?;
        act.aggregate = Some(aggregate);
        Ok(remaining)
    }

    async fn publish_turn(&self, act: &mut Activation<A>) -> Result<bool, EngineError> {
        let tx = self.transaction();
        let loaded = self.load_state(&tx, act).await?;
        let mut state = loaded.clone();

        if state.has_pending_messages() {
            let sequence = state.next_message_sequence();
            match MESSAGE_LOG.get(&tx, sequence).await {
                Ok(message) => match self.publish(&message).await {
                    Delivery::Published => {
                        debug!(sequence, kind = ?message.kind(), name = %message.payload.name, "message published");
                        state.last_message_published = sequence;
                        state.publish_failed = false;
                    }
                    Delivery::Failed(err) => {
                        warn!(sequence, error = %err, "publish failed, will retry");
                        state.publish_failed = true;
                    }
                    Delivery::Unpublishable => {
                        error!(sequence, name = %message.payload.name, "message kind cannot be published, skipping");
                        state.last_message_published = sequence;
                    }
                },
                Err(StoreError::Codec { key, source }) => {
                    error!(sequence, key = %key, error = %source, "undecodable message, skipping");
                    state.last_message_published = sequence;
                }
                Err(err) => return Err(err.into()),
            }
        }

        let plan = schedule::plan_publish(&mut state, &self.config);
        let remaining = state.has_pending_messages();
        self.finish(tx, act, &loaded, state, &plan).await?;
        Ok(remaining)
    }

    async fn snapshot_turn(&self, act: &mut Activation<A>) -> Result<Option<Envelope>, EngineError> {
        let now = self.deps.clock.now();
        let tx = self.transaction();
        let state = self.load_state(&tx, act).await?;
        let aggregate = self.load_aggregate(&tx, act, state.event_source_count).await?;
        let sequence = state.event_source_count;
        act.state = Some(state);

        if !aggregate.is_initialized() {
            return Ok(None);
        }

        let body = serde_json::to_value(&aggregate).map_err(|source| EngineError::Snapshot {
            aggregate: self.key.clone(),
            source,
        })?;
        let metadata = Metadata::new(
            self.deps.ids.generate_message_id(),
            self.deps.ids.generate_correlation_id(),
            self.key.clone(),
            now,
        );
        let mut snapshot = Envelope::new(Payload::event(format!("{}Snapshot", A::NAME), body), metadata);
        snapshot.sequence_number = sequence;
        Ok(Some(snapshot))
    }

    /// Bookkeeping after `fail` (or a timed-out `resume`) settled the processor.
    fn record_failure(
        &self,
        command: &Envelope,
        processor: &TaskProcessor,
        state: &mut ActorState,
        outbox: &mut Vec<Envelope>,
        now: DateTime<Utc>,
    ) {
        let sequence = command.sequence_number;
        let failures = processor.failure_count();
        let (message, technical_error) = processor
            .failure
            .as_ref()
            .map(|f| (f.message.clone(), f.technical_error.clone()))
            .unwrap_or_default();

        if processor.status == TaskStatus::Canceled {
            error!(sequence, failures, message = %message, "command canceled, skipping it");
            let body = json!({
                "command": command.payload.name,
                "sequence": sequence,
                "failures": failures,
                "message": message,
                "technical_error": technical_error,
            });
            outbox.push(self.caused_by(command, Payload::notification(COMMAND_FAILED, body), now));
            state.last_command_processed = sequence;
            state.clear_retry();
            return;
        }

        let retry_at = processor.next_retry_time();
        state.retry_on_failure_date_time = retry_at;
        state.retry_on_failure_period = processor.retry_wait_time(now);
        warn!(sequence, failures, retry_at = ?retry_at, message = %message, "command failed, retry scheduled");

        let window = TimeDelta::from_std(self.config.notification_dedup_window).unwrap_or(TimeDelta::MAX);
        let recently_notified = state.failure_notified_at.is_some_and(|at| now - at < window);
        if !recently_notified {
            let body = json!({
                "command": command.payload.name,
                "sequence": sequence,
                "failures": failures,
                "message": message,
                "retry_at": retry_at,
            });
            outbox.push(self.caused_by(command, Payload::notification(COMMAND_RETRY_SCHEDULED, body), now));
            state.failure_notified_at = Some(now);
        }
    }

    async fn publish(&self, message: &Envelope) -> Delivery {
        let bus = self.deps.bus.as_ref();
        let result = match message.kind() {
            MessageKind::Event => bus.publish_event(message).await,
            MessageKind::Command => bus.send_command(message).await,
            MessageKind::Notification => bus.publish_notification(message).await,
            MessageKind::Request => bus.send_request(message).await,
            MessageKind::Unknown => return Delivery::Unpublishable,
        };
        match result {
            Ok(()) => Delivery::Published,
            Err(err) => Delivery::Failed(err),
        }
    }

    fn caused_by(&self, command: &Envelope, payload: Payload, now: DateTime<Utc>) -> Envelope {
        let metadata = command
            .metadata
            .caused(self.deps.ids.generate_message_id(), now);
        Envelope::new(payload, metadata)
    }

    fn transaction(&self) -> StateTransaction<'_> {
        StateTransaction::new(self.deps.store.as_ref(), self.key.clone())
    }

    fn ensure_key(&self, actual: &AggregateKey) -> Result<(), EngineError> {
        if actual != &self.key {
            return Err(EngineError::KeyMismatch {
                expected: self.key.clone(),
                actual: actual.clone(),
            });
        }
        Ok(())
    }

    async fn load_state(
        &self,
        tx: &StateTransaction<'_>,
        act: &Activation<A>,
    ) -> Result<ActorState, EngineError> {
        match &act.state {
            Some(state) => Ok(state.clone()),
            None => Ok(tx.get(ACTOR_STATE_KEY).await?.unwrap_or_default()),
        }
    }

    async fn load_aggregate(
        &self,
        tx: &StateTransaction<'_>,
        act: &mut Activation<A>,
        event_count: u64,
    ) -> Result<A, EngineError> {
        if let Some(aggregate) = &act.aggregate {
            return Ok(aggregate.clone());
        }

        let mut aggregate = A::default();
        for sequence in 1..=event_count {
            let event = EVENT_LOG.get(tx, sequence).await?;
            aggregate.apply(&event.payload)?;
        }
        act.record_replay();
        act.aggregate = Some(aggregate.clone());
        debug!(events = event_count, "aggregate replayed");
        Ok(aggregate)
    }

    /// Persist the state if it changed, apply the schedule plan, commit.
    ///
    /// The plan goes out before the commit: a lost commit then costs one
    /// redundant wake-up instead of a stalled actor.
    async fn finish(
        &self,
        mut tx: StateTransaction<'_>,
        act: &mut Activation<A>,
        loaded: &ActorState,
        state: ActorState,
        plan: &[ScheduleAction],
    ) -> Result<(), EngineError> {
        if &state != loaded {
            tx.set(ACTOR_STATE_KEY, &state)?;
        }
        schedule::apply(self.scheduler.as_ref(), &self.key, plan).await?;
        tx.commit().await?;
        act.state = Some(state);
        Ok(())
    }

    fn settle<T>(&self, act: &mut Activation<A>, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(err) = &result {
            warn!(aggregate = %self.key, error = %err, "turn failed, activation discarded");
            act.discard();
        }
        result
    }
}
