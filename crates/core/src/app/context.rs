use std::sync::Arc;

use crate::domain::model::AppConfig;
use crate::infra::rate_limit::RateLimitGate;
use crate::infra::response_store::ResponseTierStore;
use crate::ports::clock::Clock;
use crate::ports::event_bus::EventPublisher;
use crate::ports::http::Http;
use crate::ports::ledger::Ledger;

/// Runtime dependencies shared by
/// intake, the query API and
/// maintenance (configuration, ledger,
/// HTTP client, clock, host throttle,
/// response tiers, event bus).
pub struct AppContext<L, H, C>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  pub cfg: Arc<AppConfig>,
  pub ledger: Arc<L>,
  pub http: Arc<H>,
  pub clock: Arc<C>,
  pub gate: Arc<RateLimitGate>,
  pub responses: Arc<ResponseTierStore>,
  pub events: Arc<dyn EventPublisher>,
}

impl<L, H, C> Clone for AppContext<L, H, C>
where
  L: Ledger + ?Sized,
  H: Http + ?Sized,
  C: Clock + ?Sized,
{
  fn clone(&self) -> Self {
    Self {
      cfg: Arc::clone(&self.cfg),
      ledger: Arc::clone(&self.ledger),
      http: Arc::clone(&self.http),
      clock: Arc::clone(&self.clock),
      gate: Arc::clone(&self.gate),
      responses: Arc::clone(&self.responses),
      events: Arc::clone(&self.events),
    }
  }
}
