use crate::domain::events::FeedEvent;
use crate::error::PublishError;

#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
  async fn publish(
    &self,
    event: &FeedEvent
  ) -> Result<(), PublishError>;
}
