mod consumer;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{
  Parser,
  Subcommand,
};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{
  error,
  info,
  warn,
};

use feedgate_core::app::context::AppContext;
use feedgate_core::app::maintenance::{
  Trigger,
  run_maintenance,
};
use feedgate_core::domain::model::{
  AppConfig,
  AppMode,
  LedgerSettings,
};
use feedgate_core::infra::amqp::{
  self,
  AmqpPublisher,
};
use feedgate_core::infra::bootstrap::build_adapters;
use feedgate_core::infra::clock::SystemClock;
use feedgate_core::infra::config::ConfigLoader;
use feedgate_core::infra::logging::{
  BootError,
  init_logging,
};
use feedgate_core::infra::reqwest_http::ReqwestHttp;
use feedgate_core::infra::{
  database,
  metrics,
};
use feedgate_core::ports::ledger::Ledger;

use consumer::{
  QueueKind,
  consume,
};

/// Feed fetch orchestrator: consumes
/// fetch requests from the broker and
/// keeps the request ledger
/// partitioned.
#[derive(Debug, Parser)]
#[command(name = "feedgate-fetcher")]
#[command(version)]
struct Cli {
  /// Path to config.toml. Falls back to
  /// CONFIG_PATH, then the bundled res/
  /// config.
  #[arg(long, short, global = true)]
  config: Option<String>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
  /// Consume both intake queues
  /// (default).
  Run,
  /// Run one ledger maintenance pass
  /// and exit.
  Maintain,
  /// Apply ledger migrations and exit.
  Migrate,
}

#[tokio::main]
async fn main() -> Result<(), BootError> {
  let cli = Cli::parse();
  let cfg_path =
    pick_config_path(cli.config);

  let cfg = ConfigLoader::load(&cfg_path)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;

  init_logging(&cfg.log_level);

  info!(
    config = %cfg_path.display(),
    db = %database::describe(&cfg),
    dialect = ?cfg.db_dialect,
    mode = ?cfg.mode,
    timezone = %cfg.timezone,
    rate_limited_hosts = cfg.rate_limits.len(),
    "Loaded config"
  );

  match cli.command.unwrap_or(Command::Run) {
    | Command::Migrate => {
      open_ledger(&cfg, false).await?;
      info!("Ledger migrations applied");
      Ok(())
    }
    | Command::Maintain => {
      let ledger =
        open_ledger(&cfg, false).await?;
      run_maintenance(ledger.as_ref(), &SystemClock, &cfg.ledger, Trigger::Startup)
        .await
        .map_err(|e| BootError::Fatal(e.to_string()))?;
      Ok(())
    }
    | Command::Run => run(cfg).await,
  }
}

async fn open_ledger(
  cfg: &AppConfig,
  allow_wipe: bool
) -> Result<Arc<dyn Ledger>, BootError> {
  if allow_wipe && cfg.mode == AppMode::Dev {
    database::wipe(cfg)
      .await
      .map_err(|e| BootError::Fatal(e.to_string()))?;
  }

  let ledger = database::create_ledger(cfg)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;
  ledger
    .migrate()
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;
  Ok(ledger)
}

async fn run(
  cfg: AppConfig
) -> Result<(), BootError> {
  metrics::init(&cfg.metrics).await.map_err(BootError::Fatal)?;

  let ledger =
    open_ledger(&cfg, true).await?;

  if let Err(e) = run_maintenance(ledger.as_ref(), &SystemClock, &cfg.ledger, Trigger::Startup).await {
    warn!(error = %e, "Startup ledger maintenance failed; inserts still create partitions");
  }

  let adapters = build_adapters(&cfg)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;

  let http =
    Arc::new(ReqwestHttp::new(&cfg.fetch).map_err(|e| BootError::Fatal(e.to_string()))?);

  let conn = amqp::connect(&cfg.broker.url)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;
  let publisher = AmqpPublisher::new(&conn)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;

  let prefetch =
    cfg.broker.max_concurrent_batches;
  let batch_consumer = amqp::open_consumer(&conn, &cfg.broker.batch_queue, &cfg.broker.consumer_tag, prefetch)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;
  let single_consumer = amqp::open_consumer(&conn, &cfg.broker.single_queue, &cfg.broker.consumer_tag, prefetch)
    .await
    .map_err(|e| BootError::Fatal(e.to_string()))?;

  let maintenance =
    spawn_maintenance(Arc::clone(&ledger), cfg.ledger);

  let ctx = AppContext {
    cfg: Arc::new(cfg),
    ledger,
    http,
    clock: Arc::new(SystemClock),
    gate: adapters.gate,
    responses: adapters.responses,
    events: Arc::new(publisher),
  };

  let permits =
    Arc::new(Semaphore::new(usize::from(prefetch)));
  info!(
    batch_queue = %ctx.cfg.broker.batch_queue,
    single_queue = %ctx.cfg.broker.single_queue,
    max_concurrent_batches = prefetch,
    max_concurrent_fetches = ctx.cfg.fetch.max_concurrent_fetches,
    "Fetcher started"
  );

  let result = tokio::select! {
    r = consume(ctx.clone(), batch_consumer, QueueKind::Batch, Arc::clone(&permits)) => r,
    r = consume(ctx.clone(), single_consumer, QueueKind::Single, Arc::clone(&permits)) => r,
    _ = tokio::signal::ctrl_c() => {
      info!("Shutdown requested");
      Ok(())
    }
  };

  maintenance.abort();

  if let Err(e) = result {
    error!(error = %e, "Fatal consumer error");
    return Err(BootError::Fatal(e));
  }
  Ok(())
}

fn spawn_maintenance(
  ledger: Arc<dyn Ledger>,
  settings: LedgerSettings
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    let period =
      Duration::from_secs(settings.maintenance_interval_seconds.max(60));
    let mut ticker =
      tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires at once;
    // startup already ran a pass.
    ticker.tick().await;

    loop {
      ticker.tick().await;
      if let Err(e) = run_maintenance(ledger.as_ref(), &SystemClock, &settings, Trigger::Interval).await {
        error!(error = %e, "Ledger maintenance failed");
      }
    }
  })
}

fn pick_config_path(
  arg1: Option<String>
) -> PathBuf {
  if let Some(p) = arg1 {
    return PathBuf::from(p);
  }

  if let Ok(p) = std::env::var("CONFIG_PATH")
    && !p.trim().is_empty()
  {
    return PathBuf::from(p);
  }

  let candidates = [
    PathBuf::from("crates/fetcher/res/config.toml"),
    PathBuf::from("res/config.toml"),
  ];

  for p in &candidates {
    if p.exists() {
      return p.clone();
    }
  }

  candidates[0].clone()
}
