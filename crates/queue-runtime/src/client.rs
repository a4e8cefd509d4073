//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage};
use crate::provider::{InMemoryConfig, ProviderConfig, ProviderType, QueueConfig};
use crate::providers::InMemoryProvider;
use async_trait::async_trait;
use chrono::Duration;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Main interface for queue operations across all providers
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Send single message to queue
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError>;

    /// Send multiple messages in batch (if supported)
    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Receive single message from queue
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Receive multiple messages from queue
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Mark message as successfully processed
    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Return message to queue for retry
    async fn abandon_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError>;

    /// Send message to dead letter queue
    async fn dead_letter_message(
        &self,
        receipt: ReceiptHandle,
        reason: String,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Check if provider supports batch operations
    fn supports_batching(&self) -> bool;
}

/// Interface implemented by specific queue providers
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Send single message
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError>;

    /// Send multiple messages
    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError>;

    /// Receive single message
    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Receive multiple messages
    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Complete message processing
    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Abandon message for retry
    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Send to dead letter queue
    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;

    /// Check batch operation support
    fn supports_batching(&self) -> bool;

    /// Get maximum batch size
    fn max_batch_size(&self) -> u32;
}

/// Factory for creating queue clients with appropriate providers
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create queue client from configuration
    pub async fn create_client(config: QueueConfig) -> Result<Box<dyn QueueClient>, QueueError> {
        let client_config = config.clone();

        let provider: Box<dyn QueueProvider> = match config.provider {
            ProviderConfig::InMemory(in_memory_config) => {
                Box::new(InMemoryProvider::new(in_memory_config))
            }
        };

        Ok(Box::new(StandardQueueClient::new(provider, client_config)))
    }

    /// Create test client with in-memory provider
    pub fn create_test_client() -> Box<dyn QueueClient> {
        let provider = InMemoryProvider::new(InMemoryConfig::default());
        let config = QueueConfig::default();
        Box::new(StandardQueueClient::new(Box::new(provider), config))
    }
}

/// Standard queue client implementation
pub struct StandardQueueClient {
    provider: Box<dyn QueueProvider>,
    #[allow(dead_code)] // Will be used for retry logic and timeouts in future
    config: QueueConfig,
}

impl StandardQueueClient {
    /// Create new standard queue client with provider
    pub fn new(provider: Box<dyn QueueProvider>, config: QueueConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: Message,
    ) -> Result<MessageId, QueueError> {
        self.provider.send_message(queue, &message).await
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: Vec<Message>,
    ) -> Result<Vec<MessageId>, QueueError> {
        self.provider.send_messages(queue, &messages).await
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        self.provider.receive_message(queue, timeout).await
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.provider
            .receive_messages(queue, max_messages, timeout)
            .await
    }

    async fn complete_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.complete_message(&receipt).await
    }

    async fn abandon_message(&self, receipt: ReceiptHandle) -> Result<(), QueueError> {
        self.provider.abandon_message(&receipt).await
    }

    async fn dead_letter_message(
        &self,
        receipt: ReceiptHandle,
        reason: String,
    ) -> Result<(), QueueError> {
        self.provider.dead_letter_message(&receipt, &reason).await
    }

    fn provider_type(&self) -> ProviderType {
        self.provider.provider_type()
    }

    fn supports_batching(&self) -> bool {
        self.provider.supports_batching()
    }
}
