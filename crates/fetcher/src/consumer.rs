//! Queue consumers: every delivery
//! becomes one batch, run on its own
//! task behind a shared permit pool.
use std::sync::Arc;

use futures::StreamExt;
use lapin::Consumer;
use lapin::message::Delivery;
use lapin::options::{
  BasicAckOptions,
  BasicRejectOptions,
};
use tokio::sync::Semaphore;
use tracing::{
  debug,
  error,
  warn,
};

use feedgate_core::app::context::AppContext;
use feedgate_core::app::intake::process_batch;
use feedgate_core::domain::messages::{
  BatchRequest,
  MessageError,
  parse_batch_message,
  parse_single_message,
};
use feedgate_core::ports::clock::Clock;
use feedgate_core::ports::http::Http;
use feedgate_core::ports::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
  Batch,
  Single,
}

impl QueueKind {
  pub fn as_str(self) -> &'static str {
    match self {
      | QueueKind::Batch => "batch",
      | QueueKind::Single => "single",
    }
  }

  fn decode(
    self,
    body: &[u8]
  ) -> Result<BatchRequest, MessageError> {
    match self {
      | QueueKind::Batch => parse_batch_message(body),
      | QueueKind::Single => parse_single_message(body),
    }
  }
}

/// Drains `consumer` until the broker
/// closes it.
pub async fn consume<L, H, C>(
  ctx: AppContext<L, H, C>,
  mut consumer: Consumer,
  kind: QueueKind,
  permits: Arc<Semaphore>,
) -> Result<(), String>
where
  L: Ledger + ?Sized + 'static,
  H: Http + ?Sized + 'static,
  C: Clock + ?Sized + 'static,
{
  while let Some(delivery) = consumer.next().await {
    let delivery =
      delivery.map_err(|e| format!("{} consumer: {e}", kind.as_str()))?;

    let permit = Arc::clone(&permits)
      .acquire_owned()
      .await
      .map_err(|e| format!("{} permits: {e}", kind.as_str()))?;

    let ctx = ctx.clone();
    tokio::spawn(async move {
      let _permit = permit;
      handle_delivery(&ctx, kind, delivery).await;
    });
  }

  warn!(queue = kind.as_str(), "Consumer stream ended");
  Ok(())
}

async fn handle_delivery<L, H, C>(
  ctx: &AppContext<L, H, C>,
  kind: QueueKind,
  delivery: Delivery
)
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  let batch = match kind.decode(&delivery.data) {
    | Ok(b) => b,
    | Err(e) => {
      error!(
        queue = kind.as_str(),
        bytes = delivery.data.len(),
        error = %e,
        "Dropping undecodable message"
      );
      if let Err(e) = delivery.acker.reject(BasicRejectOptions { requeue: false }).await {
        warn!(queue = kind.as_str(), error = %e, "Reject failed");
      }
      return;
    }
  };

  let report =
    process_batch(ctx, batch).await;
  debug!(
    queue = kind.as_str(),
    items = report.items,
    rows = report.rows_written,
    flush_failed = report.flush_error.is_some(),
    "Delivery handled"
  );

  if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
    warn!(queue = kind.as_str(), error = %e, "Ack failed");
  }
}
