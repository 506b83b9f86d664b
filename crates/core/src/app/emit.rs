use tracing::{
  info,
  warn
};

use crate::domain::events::FeedEvent;
use crate::infra::metrics;
use crate::ports::event_bus::EventPublisher;

/// Publishes `event`; a broker failure
/// is logged and never fails the
/// caller.
pub async fn emit(
  publisher: &dyn EventPublisher,
  event: FeedEvent
) {
  match publisher.publish(&event).await {
    | Ok(()) => {
      metrics::record_event(event.name());
      match &event {
        | FeedEvent::UrlFailedDisable { .. } | FeedEvent::UrlRejectedDisable { .. } => {
          info!(event = event.name(), url = event.url(), lookup_key = event.lookup_key(), "Disable event emitted");
        }
        | _ => {}
      }
    }
    | Err(e) => {
      warn!(
        event = event.name(),
        url = event.url(),
        lookup_key = event.lookup_key(),
        error = %e,
        "Failed to publish event"
      );
    }
  }
}
