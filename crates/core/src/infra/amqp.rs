//! RabbitMQ plumbing: the event
//! publisher and the intake consumers.
use lapin::options::{
  BasicConsumeOptions,
  BasicPublishOptions,
  BasicQosOptions,
  QueueDeclareOptions
};
use lapin::types::FieldTable;
use lapin::{
  BasicProperties,
  Channel,
  Connection,
  ConnectionProperties,
  Consumer
};
use tracing::{
  debug,
  info,
  instrument
};

use crate::domain::events::{
  FETCH_COMPLETED,
  FeedEvent,
  URL_FAILED_DISABLE,
  URL_FAILING,
  URL_REJECTED_DISABLE
};
use crate::error::PublishError;
use crate::ports::event_bus::EventPublisher;

const EVENT_QUEUES: [&str; 4] = [FETCH_COMPLETED, URL_FAILING, URL_FAILED_DISABLE, URL_REJECTED_DISABLE];

fn broker_err(
  op: &str,
  e: lapin::Error
) -> PublishError {
  PublishError::Broker(format!("{op}: {e}"))
}

pub async fn connect(
  uri: &str
) -> Result<Connection, PublishError> {
  let conn = Connection::connect(uri, ConnectionProperties::default())
    .await
    .map_err(|e| broker_err("amqp connect", e))?;
  info!("Connected to broker");
  Ok(conn)
}

pub async fn declare_queue(
  channel: &Channel,
  queue: &str
) -> Result<(), PublishError> {
  channel
    .queue_declare(
      queue,
      QueueDeclareOptions {
        durable: true,
        ..Default::default()
      },
      FieldTable::default(),
    )
    .await
    .map_err(|e| broker_err("amqp declare", e))?;
  Ok(())
}

/// Opens a consumer with `prefetch`
/// unacked deliveries in flight.
pub async fn open_consumer(
  conn: &Connection,
  queue: &str,
  consumer_tag: &str,
  prefetch: u16,
) -> Result<Consumer, PublishError> {
  let channel = conn
    .create_channel()
    .await
    .map_err(|e| broker_err("amqp channel", e))?;
  channel
    .basic_qos(prefetch, BasicQosOptions::default())
    .await
    .map_err(|e| broker_err("amqp qos", e))?;
  declare_queue(&channel, queue).await?;

  let tag =
    format!("{consumer_tag}.{queue}");
  let consumer = channel
    .basic_consume(queue, &tag, BasicConsumeOptions::default(), FieldTable::default())
    .await
    .map_err(|e| broker_err("amqp consume", e))?;
  info!(queue, consumer_tag = %tag, prefetch, "Consuming queue");
  Ok(consumer)
}

/// Publishes events to the default
/// exchange, routed by event name.
#[derive(Clone)]
pub struct AmqpPublisher {
  channel: Channel,
}

impl AmqpPublisher {
  pub async fn new(
    conn: &Connection
  ) -> Result<Self, PublishError> {
    let channel = conn
      .create_channel()
      .await
      .map_err(|e| broker_err("amqp channel", e))?;
    for queue in EVENT_QUEUES {
      declare_queue(&channel, queue).await?;
    }
    Ok(Self { channel })
  }
}

#[async_trait::async_trait]
impl EventPublisher for AmqpPublisher {
  #[instrument(level = "debug", skip(self, event), fields(event = event.name()))]
  async fn publish(
    &self,
    event: &FeedEvent
  ) -> Result<(), PublishError> {
    let body = event.to_json()?;
    self.channel
      .basic_publish(
        "",
        event.name(),
        BasicPublishOptions::default(),
        &body,
        BasicProperties::default()
          .with_content_type("application/json".into())
          .with_delivery_mode(2),
      )
      .await
      .map_err(|e| broker_err("amqp publish", e))?;
    debug!(lookup_key = event.lookup_key(), "Event published");
    Ok(())
  }
}
