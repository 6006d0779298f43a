//! AMQP (RabbitMQ) broker gateway.
//!
//! Queues are named after the event type and reached through the default
//! exchange, so the routing key of every delivery is the queue name.
//! Connections come from a bounded pool; each operation opens its own channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use deadpool_lapin::{Manager, Pool, PoolError};
use futures::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, ConnectionProperties,
};
use tracing::{debug, error, info, warn};

use super::{BrokerGateway, BusError, DeliveryHandler, Result};
use crate::config::BrokerSettings;

/// Default exchange: routes by queue name.
const DEFAULT_EXCHANGE: &str = "";

/// Content type stamped on published bodies.
const CONTENT_TYPE: &str = "application/json";

/// Reply code for a normal channel close.
const REPLY_SUCCESS: u16 = 200;

/// Queue properties shared by every publisher and consumer.
///
/// All callers must declare with identical properties or the broker rejects
/// the declaration.
fn queue_options() -> QueueDeclareOptions {
    QueueDeclareOptions {
        passive: false,
        durable: false,
        exclusive: false,
        auto_delete: false,
        nowait: false,
    }
}

fn consumer_tag() -> String {
    format!("microbus-{}", uuid::Uuid::new_v4())
}

/// RabbitMQ gateway backed by a `deadpool-lapin` connection pool.
pub struct AmqpGateway {
    pool: Pool,
    publish_retries: usize,
}

impl AmqpGateway {
    /// Build the connection pool and verify the broker is reachable.
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let manager = Manager::new(settings.amqp_url(), ConnectionProperties::default());
        let pool = Pool::builder(manager)
            .max_size(settings.pool_size)
            .build()
            .map_err(|e| BusError::Connection(format!("Failed to create pool: {}", e)))?;

        // Verify connection
        let channel = Self::get_channel(&pool).await?;
        Self::close_channel(&channel, "connection verified").await;

        info!(
            host = %settings.host,
            port = settings.port,
            virtual_host = %settings.virtual_host,
            pool_size = settings.pool_size,
            "Connected to AMQP"
        );

        Ok(Self {
            pool,
            publish_retries: settings.publish_retries,
        })
    }

    /// Open a channel on a pooled connection.
    async fn get_channel(pool: &Pool) -> Result<Channel> {
        let conn = pool.get().await.map_err(|e: PoolError| {
            BusError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.create_channel()
            .await
            .map_err(|e| BusError::Connection(format!("Failed to create channel: {}", e)))
    }

    async fn close_channel(channel: &Channel, reason: &str) {
        if let Err(e) = channel.close(REPLY_SUCCESS, reason).await {
            debug!(error = %e, "Failed to close channel");
        }
    }

    async fn declare(channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(queue, queue_options(), FieldTable::default())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to declare queue '{}': {}", queue, e)))?;
        Ok(())
    }

    /// One publish attempt on a fresh channel. The channel is closed on every path.
    async fn publish_once(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let channel = Self::get_channel(&self.pool).await?;

        let result = async {
            Self::declare(&channel, queue).await?;

            let properties = BasicProperties::default().with_content_type(CONTENT_TYPE.into());

            // No confirm wait: the returned PublisherConfirm is dropped.
            channel
                .basic_publish(
                    DEFAULT_EXCHANGE,
                    queue,
                    BasicPublishOptions::default(),
                    payload,
                    properties,
                )
                .await
                .map_err(|e| BusError::Publish(format!("Failed to publish to '{}': {}", queue, e)))?;
            Ok::<(), BusError>(())
        }
        .await;

        Self::close_channel(&channel, "publish complete").await;
        result
    }

    /// Set up consumer channel and queue.
    async fn setup_consumer(pool: &Pool, queue: &str) -> Result<lapin::Consumer> {
        let channel = Self::get_channel(pool).await?;
        Self::declare(&channel, queue)
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        channel
            .basic_consume(
                queue,
                &consumer_tag(),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BusError::Subscribe(format!("Failed to start consumer on '{}': {}", queue, e)))
    }

    /// Process deliveries until the process exits.
    ///
    /// When the stream ends or errors, the consumer is re-established with
    /// exponential backoff and jitter.
    async fn consume_with_reconnect(
        pool: Pool,
        queue: String,
        mut consumer: lapin::Consumer,
        handler: Arc<dyn DeliveryHandler>,
    ) {
        let backoff_builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter();

        loop {
            // Deliveries are handled one at a time; a slow handler holds the queue.
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        handler
                            .on_delivery(delivery.routing_key.as_str(), &delivery.data)
                            .await;
                    }
                    Err(e) => {
                        error!(queue = %queue, error = %e, "Consumer delivery error, will reconnect");
                        break;
                    }
                }
            }

            warn!(queue = %queue, "Consumer stream ended, reconnecting...");

            let mut backoff = backoff_builder.build();
            consumer = loop {
                let delay = backoff.next().unwrap_or(Duration::from_secs(30));
                tokio::time::sleep(delay).await;

                match Self::setup_consumer(&pool, &queue).await {
                    Ok(consumer) => {
                        info!(queue = %queue, "Consumer reconnected");
                        break consumer;
                    }
                    Err(e) => {
                        error!(
                            queue = %queue,
                            error = %e,
                            backoff_ms = %delay.as_millis(),
                            "Failed to set up consumer, retrying after backoff"
                        );
                    }
                }
            };
        }
    }
}

#[async_trait]
impl BrokerGateway for AmqpGateway {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(queue = %queue))]
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(5))
            .with_max_times(self.publish_retries)
            .with_jitter()
            .build();

        let mut last_error = None;

        for (attempt, delay) in std::iter::once(Duration::ZERO).chain(backoff).enumerate() {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            match self.publish_once(queue, &payload).await {
                Ok(()) => {
                    debug!(queue = %queue, bytes = payload.len(), "Published message");
                    return Ok(());
                }
                // Only connection-level failures are worth another attempt.
                Err(e @ BusError::Connection(_)) => {
                    error!(
                        attempt = attempt + 1,
                        max_retries = self.publish_retries,
                        error = %e,
                        "Publish failed, retrying..."
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| BusError::Publish("Max retries exceeded".to_string())))
    }

    async fn start_consuming(&self, queue: &str, handler: Arc<dyn DeliveryHandler>) -> Result<()> {
        let consumer = Self::setup_consumer(&self.pool, queue).await?;

        info!(queue = %queue, "Consumer connected, processing messages");

        tokio::spawn(Self::consume_with_reconnect(
            self.pool.clone(),
            queue.to_string(),
            consumer,
            handler,
        ));

        Ok(())
    }
}
