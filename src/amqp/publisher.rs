//! AMQP event publisher for outbound queue events

use crate::amqp::messages::{
    routing_key_for_leave, MessageEnvelope, MATCH_FORMED_ROUTING_KEY, PLAYER_QUEUED_ROUTING_KEY,
    QUEUE_EVENTS_EXCHANGE,
};
use crate::config::AmqpSettings;
use crate::error::{MatchmakingError, Result};
use crate::types::*;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing queue events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a PlayerQueued event
    async fn publish_player_queued(&self, event: PlayerQueued) -> Result<()>;

    /// Publish a PlayerLeftQueue event (voluntary leave, expiry, match or clear)
    async fn publish_player_left(&self, event: PlayerLeftQueue) -> Result<()>;

    /// Publish a MatchFormed event
    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange_name: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange_name: QUEUE_EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl From<&AmqpSettings> for PublisherConfig {
    fn from(settings: &AmqpSettings) -> Self {
        Self {
            exchange_name: settings.exchange_name.clone(),
            max_retries: settings.max_retry_attempts,
            retry_delay_ms: settings.retry_delay_ms,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let mut args = ExchangeDeclareArguments::new(&self.config.exchange_name, "topic");
        args.durable(true);
        self.channel.exchange_declare(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange {}: {}",
                    self.config.exchange_name, e
                ),
            }
        })?;

        info!(
            "Successfully set up AMQP exchange {}",
            self.config.exchange_name
        );
        Ok(())
    }

    /// Publish with exponential backoff between attempts
    async fn publish_with_retry<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(_) => {
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }

                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );

                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(&self.config.exchange_name, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to publish message: {}", e),
            })?;

        Ok(())
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_player_queued(&self, event: PlayerQueued) -> Result<()> {
        let envelope = MessageEnvelope::new(event, PLAYER_QUEUED_ROUTING_KEY.to_string());
        self.publish_with_retry(&envelope).await
    }

    async fn publish_player_left(&self, event: PlayerLeftQueue) -> Result<()> {
        let routing_key = routing_key_for_leave(event.reason);
        let envelope = MessageEnvelope::new(event, routing_key.to_string());
        self.publish_with_retry(&envelope).await
    }

    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()> {
        let envelope = MessageEnvelope::new(event, MATCH_FORMED_ROUTING_KEY.to_string());
        self.publish_with_retry(&envelope).await
    }
}

/// Publisher that drops every event; used when AMQP is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventPublisher;

#[async_trait]
impl EventPublisher for NullEventPublisher {
    async fn publish_player_queued(&self, event: PlayerQueued) -> Result<()> {
        debug!("Dropping PlayerQueued for {} (publishing disabled)", event.identity);
        Ok(())
    }

    async fn publish_player_left(&self, event: PlayerLeftQueue) -> Result<()> {
        debug!("Dropping PlayerLeftQueue for {} (publishing disabled)", event.identity);
        Ok(())
    }

    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()> {
        debug!("Dropping MatchFormed {} (publishing disabled)", event.match_id);
        Ok(())
    }
}

/// Mock event publisher for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: std::sync::Mutex<Vec<QueueEvent>>,
    failing: AtomicBool,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish call fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Names of all published event types, in order
    pub fn get_published_events(&self) -> Vec<String> {
        self.events().iter().map(|e| e.name().to_string()).collect()
    }

    /// Full copies of all published events
    pub fn events(&self) -> Vec<QueueEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.published_events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: QueueEvent) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::AmqpConnectionFailed {
                message: "mock publisher set to fail".to_string(),
            }
            .into());
        }
        if let Ok(mut events) = self.published_events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_player_queued(&self, event: PlayerQueued) -> Result<()> {
        self.record(QueueEvent::PlayerQueued(event))
    }

    async fn publish_player_left(&self, event: PlayerLeftQueue) -> Result<()> {
        self.record(QueueEvent::PlayerLeftQueue(event))
    }

    async fn publish_match_formed(&self, event: MatchFormed) -> Result<()> {
        self.record(QueueEvent::MatchFormed(event))
    }
}
