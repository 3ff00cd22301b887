use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use spindle_core::app::{ActorStatus, EngineConfig, RuntimeConfig};
use spindle_core::domain::{
    Aggregate, AggregateError, AggregateKey, Envelope, Metadata, Payload, ResiliencyPolicy,
};
use spindle_core::impls::{InMemoryBus, InMemoryStateStore};
use spindle_core::ports::{
    Clock, CommandHandler, HandlerError, HandlerOutput, IdGenerator, SystemClock, UlidGenerator,
};
use spindle_core::{ActorRuntime, RuntimeBuilder};

#[derive(Parser, Debug)]
#[command(name = "spindle")]
#[command(version, about = "Run a counter aggregate through the spindle engine", long_about = None)]
struct Cli {
    /// Number of Increment commands to submit
    #[arg(long, default_value = "5")]
    commands: u32,

    /// Reject this many handler attempts before accepting
    #[arg(long, default_value = "2")]
    fail_first: u32,

    /// Runtime config as JSON (defaults to a fast-retry demo config)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Aggregate id of the counter
    #[arg(long, default_value = "demo")]
    id: String,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    value: i64,
    increments: u64,
}

#[derive(Debug, Deserialize)]
struct Incremented {
    by: i64,
}

impl Aggregate for Counter {
    const NAME: &'static str = "Counter";

    fn apply(&mut self, event: &Payload) -> Result<(), AggregateError> {
        if event.name == "Incremented" {
            let e: Incremented = serde_json::from_value(event.body.clone())
                .map_err(|err| AggregateError::decode(&event.name, err))?;
            self.value += e.by;
            self.increments += 1;
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.increments > 0
    }
}

/// Accepts `Increment { by }`, but rejects the first `fail_first` attempts.
struct CounterHandler {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl CommandHandler<Counter> for CounterHandler {
    async fn dispatch(
        &self,
        command: &Payload,
        _metadata: &Metadata,
        aggregate: &Counter,
    ) -> Result<HandlerOutput, HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::rejected_with(
                "counter is busy",
                format!("intentional failure (left={left})"),
            ));
        }

        let by = command.body["by"]
            .as_i64()
            .ok_or_else(|| HandlerError::rejected("Increment needs an integer `by`"))?;
        let value = aggregate.value + by;
        let mut output =
            HandlerOutput::new().event(Payload::event("Incremented", serde_json::json!({ "by": by })));
        if value % 10 == 0 {
            output = output.message(Payload::notification(
                "CounterMilestone",
                serde_json::json!({ "value": value }),
            ));
        }
        Ok(output)
    }
}

fn demo_config() -> RuntimeConfig {
    RuntimeConfig {
        engine: EngineConfig {
            resiliency: ResiliencyPolicy {
                initial_period: Duration::from_millis(200),
                period: Duration::from_millis(200),
                maximum_exponential_period: Duration::from_secs(2),
                ..ResiliencyPolicy::default()
            },
            ..EngineConfig::default()
        },
        reminder_poll_interval: Duration::from_millis(100),
        ..RuntimeConfig::default()
    }
}

fn increment(ids: &impl IdGenerator, key: &AggregateKey, by: i64) -> Envelope {
    Envelope::new(
        Payload::command("Increment", serde_json::json!({ "by": by })),
        Metadata::new(
            ids.generate_message_id(),
            ids.generate_correlation_id(),
            key.clone(),
            SystemClock.now(),
        ),
    )
}

async fn wait_until_drained(
    runtime: &ActorRuntime<Counter>,
    key: &AggregateKey,
) -> Result<ActorStatus, Box<dyn std::error::Error>> {
    loop {
        let status = runtime.status(key).await?;
        if status.is_drained() {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_json_file(path)?,
        None => demo_config(),
    };

    let bus = Arc::new(InMemoryBus::new());
    let runtime = RuntimeBuilder::<Counter>::new()
        .store(Arc::new(InMemoryStateStore::new()))
        .handler(CounterHandler {
            remaining_failures: AtomicU32::new(cli.fail_first),
        })
        .bus(bus.clone())
        .config(config)
        .build()?;

    let key = AggregateKey::new(Counter::NAME, cli.id.clone());
    let ids = UlidGenerator::new(SystemClock);
    let batch = (1..=cli.commands)
        .map(|i| increment(&ids, &key, i64::from(i)))
        .collect();
    let count = runtime.submit(&key, batch).await?;
    info!(aggregate = %key, commands = count, "batch submitted");

    let timeout = Duration::from_secs(cli.timeout_secs);
    let status = tokio::select! {
        result = tokio::time::timeout(timeout, wait_until_drained(&runtime, &key)) => match result {
            Ok(status) => Some(status?),
            Err(_) => {
                warn!(aggregate = %key, "gave up waiting for the actor to drain");
                None
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            None
        }
    };

    if let Some(status) = status {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    if let Some(snapshot) = runtime.snapshot(&key).await? {
        println!("snapshot: {}", snapshot.payload.body);
    }
    for message in bus.delivered().await {
        println!(
            "published #{} {:?} {} {}",
            message.sequence_number, message.payload.kind, message.payload.name, message.payload.body
        );
    }

    runtime.shutdown_and_join().await;
    Ok(())
}
