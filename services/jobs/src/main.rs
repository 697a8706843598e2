use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use forecast_core::clock::SystemClock;
use forecast_core::events::{LogDispatcher, RedisDispatcher};
use forecast_core::price::PgPriceSource;
use forecast_core::store::PgStore;
use forecast_core::{
    EvaluationScheduler, NotificationDispatcher, ReputationEngine, SchedulerConfig,
};
use tracing::{info, warn};

mod scheduler;
mod tasks;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "60")]
    interval_secs: u64,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Outcome events go to Redis pub/sub when set; otherwise they are written
    /// to the log and nothing is delivered to websocket clients.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, default_value = "5")]
    max_db_connections: u32,

    #[arg(long, default_value = "16")]
    concurrency: usize,

    #[arg(long, default_value = "500")]
    batch_size: usize,

    #[arg(long, default_value = "5000")]
    price_timeout_ms: u64,

    /// How long a prediction whose price lookup failed waits before retry.
    #[arg(long, default_value = "300")]
    retry_backoff_secs: i64,

    /// Run reputation reconcile every N evaluation cycles.
    #[arg(long, default_value = "10")]
    reconcile_every: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forecast_core::logging::init_logging("info,sqlx=warn");
    let args = Args::parse();

    let store = PgStore::connect(&args.database_url, args.max_db_connections).await?;
    store.ensure_schema().await?;
    let prices = PgPriceSource::new(store.pool().clone());
    let store = Arc::new(store);

    let dispatcher: Arc<dyn NotificationDispatcher> = match args.redis_url.as_deref() {
        Some(url) => Arc::new(RedisDispatcher::new(url)?),
        None => {
            warn!("no REDIS_URL, outcome events are only logged");
            Arc::new(LogDispatcher)
        }
    };

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(args.interval_secs.max(5)),
        price_timeout: Duration::from_millis(args.price_timeout_ms),
        batch_size: args.batch_size,
        concurrency: args.concurrency,
        retry_backoff: chrono::Duration::seconds(args.retry_backoff_secs.max(1)),
    };
    let interval = config.poll_interval;
    let scheduler = EvaluationScheduler::new(
        store.clone(),
        Arc::new(prices),
        ReputationEngine::new(store),
        dispatcher,
        Arc::new(SystemClock),
        config,
    );

    info!(interval_secs = interval.as_secs(), "jobs starting");
    scheduler::run_loop(scheduler, interval, args.reconcile_every).await?;
    Ok(())
}
