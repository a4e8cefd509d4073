//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue implementation that:
//! - Implements scheduled delivery and visibility timeouts
//! - Suppresses duplicate sends sharing a pending uniqueness key
//! - Moves exhausted messages to a real per-queue dead letter store
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit testing of queue-runtime consumers
//! - Development and prototyping
//! - Reference implementation for cloud providers

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            config,
        }
    }

    /// Get or create a queue
    fn get_or_create_queue(&mut self, queue_name: &QueueName) -> &mut InMemoryQueue {
        self.queues
            .entry(queue_name.clone())
            .or_insert_with(|| InMemoryQueue::new(self.config.clone()))
    }
}

/// Internal queue state for a single queue
struct InMemoryQueue {
    /// Main message queue (FIFO order)
    messages: VecDeque<StoredMessage>,
    /// Dead letter queue for exhausted messages
    dead_letter: VecDeque<StoredMessage>,
    /// In-flight messages being processed
    in_flight: HashMap<String, InFlightMessage>,
    /// Uniqueness keys currently pending (not yet completed or dead-lettered)
    pending_uniqueness_keys: HashMap<String, MessageId>,
    /// Configuration
    config: InMemoryConfig,
}

impl InMemoryQueue {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            messages: VecDeque::new(),
            dead_letter: VecDeque::new(),
            in_flight: HashMap::new(),
            pending_uniqueness_keys: HashMap::new(),
            config,
        }
    }
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    task_kind: String,
    body: Bytes,
    attributes: HashMap<String, String>,
    correlation_id: Option<String>,
    uniqueness_key: Option<String>,
    max_retries: Option<u32>,
    enqueued_at: Timestamp,
    delivery_count: u32,
    available_at: Timestamp,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn from_message(message: &Message, message_id: MessageId) -> Self {
        let now = Timestamp::now();
        let expires_at = message
            .time_to_live
            .map(|ttl| Timestamp::from_datetime(now.as_datetime() + ttl));
        let available_at = message.visible_after.unwrap_or(now);

        Self {
            message_id,
            task_kind: message.task_kind.clone(),
            body: message.body.clone(),
            attributes: message.attributes.clone(),
            correlation_id: message.correlation_id.clone(),
            uniqueness_key: message.uniqueness_key.clone(),
            max_retries: message.max_retries,
            enqueued_at: now,
            delivery_count: 0,
            available_at,
            expires_at,
        }
    }

    /// Check if message is expired based on TTL
    fn is_expired(&self) -> bool {
        if let Some(ref expires_at) = self.expires_at {
            Timestamp::now() >= *expires_at
        } else {
            false
        }
    }

    /// Check if message is available for receiving
    fn is_available(&self) -> bool {
        Timestamp::now() >= self.available_at
    }
}

/// A message currently being processed
struct InFlightMessage {
    message: StoredMessage,
    lock_expires_at: Timestamp,
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider implementation
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new(config))),
        }
    }

    /// Return expired in-flight messages back to the queue
    fn return_expired_messages(queue: &mut InMemoryQueue) {
        let now = Timestamp::now();
        let mut expired_handles = Vec::new();

        for (handle, inflight) in &queue.in_flight {
            if now >= inflight.lock_expires_at {
                expired_handles.push(handle.clone());
            }
        }

        for handle in expired_handles {
            if let Some(inflight) = queue.in_flight.remove(&handle) {
                let mut message = inflight.message;
                message.available_at = now;
                queue.messages.push_back(message);
            }
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl InMemoryProvider {
    /// Number of messages currently sitting in a queue's dead letter store.
    /// Exposed for tests and for retention sweeps over the in-memory backend.
    pub fn dead_letter_len(&self, queue: &QueueName) -> usize {
        let storage = self.storage.read().unwrap();
        storage
            .queues
            .get(queue)
            .map(|q| q.dead_letter.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn send_message(
        &self,
        queue: &QueueName,
        message: &Message,
    ) -> Result<MessageId, QueueError> {
        let message_size = message.body.len();
        let max_size = self.provider_type().max_message_size();
        if message_size > max_size {
            return Err(QueueError::MessageTooLarge {
                size: message_size,
                max_size,
            });
        }

        let message_id = MessageId::new();

        let mut storage = self.storage.write().unwrap();
        let queue_state = storage.get_or_create_queue(queue);

        if let Some(key) = &message.uniqueness_key {
            if queue_state.pending_uniqueness_keys.contains_key(key) {
                return Err(QueueError::DuplicateMessage {
                    uniqueness_key: key.clone(),
                });
            }
        }

        let stored_message = StoredMessage::from_message(message, message_id.clone());

        if let Some(key) = &message.uniqueness_key {
            queue_state
                .pending_uniqueness_keys
                .insert(key.clone(), message_id.clone());
        }

        queue_state.messages.push_back(stored_message);

        Ok(message_id)
    }

    async fn send_messages(
        &self,
        queue: &QueueName,
        messages: &[Message],
    ) -> Result<Vec<MessageId>, QueueError> {
        if messages.len() > self.max_batch_size() as usize {
            return Err(QueueError::BatchTooLarge {
                size: messages.len(),
                max_size: self.max_batch_size() as usize,
            });
        }

        let mut message_ids = Vec::with_capacity(messages.len());
        for message in messages {
            let message_id = self.send_message(queue, message).await?;
            message_ids.push(message_id);
        }

        Ok(message_ids)
    }

    async fn receive_message(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<ReceivedMessage>, QueueError> {
        let start_time = std::time::Instant::now();
        let timeout_duration = timeout
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(30));

        loop {
            let received_message = {
                let mut storage = self.storage.write().unwrap();
                let visibility_timeout = storage.config.visibility_timeout;
                let queue_state = storage.get_or_create_queue(queue);

                Self::return_expired_messages(queue_state);

                let message_index = queue_state
                    .messages
                    .iter()
                    .position(|msg| !msg.is_expired() && msg.is_available());

                if let Some(index) = message_index {
                    let mut stored_message = queue_state.messages.remove(index).unwrap();
                    stored_message.delivery_count += 1;

                    let now = Timestamp::now();
                    let receipt_handle_str = uuid::Uuid::new_v4().to_string();
                    let lock_expires_at =
                        Timestamp::from_datetime(now.as_datetime() + visibility_timeout);
                    let receipt_handle = ReceiptHandle::new(
                        receipt_handle_str.clone(),
                        lock_expires_at,
                        ProviderType::InMemory,
                    );

                    let received_message = ReceivedMessage {
                        message_id: stored_message.message_id.clone(),
                        task_kind: stored_message.task_kind.clone(),
                        body: stored_message.body.clone(),
                        attributes: stored_message.attributes.clone(),
                        correlation_id: stored_message.correlation_id.clone(),
                        receipt_handle,
                        delivery_count: stored_message.delivery_count,
                        first_delivered_at: stored_message.enqueued_at,
                        delivered_at: now,
                    };

                    let inflight = InFlightMessage {
                        message: stored_message,
                        lock_expires_at,
                    };
                    queue_state.in_flight.insert(receipt_handle_str, inflight);

                    Some(received_message)
                } else {
                    None
                }
            };

            if let Some(msg) = received_message {
                return Ok(Some(msg));
            }

            if start_time.elapsed() >= timeout_duration {
                return Ok(None);
            }

            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    async fn receive_messages(
        &self,
        queue: &QueueName,
        max_messages: u32,
        timeout: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut messages = Vec::new();
        let start_time = std::time::Instant::now();
        let timeout_duration = timeout
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(30));

        while messages.len() < max_messages as usize {
            let remaining_timeout = timeout_duration
                .checked_sub(start_time.elapsed())
                .unwrap_or(std::time::Duration::ZERO);

            if remaining_timeout.is_zero() {
                break;
            }

            let remaining_duration =
                Duration::from_std(remaining_timeout).unwrap_or(Duration::zero());
            let received = self.receive_message(queue, remaining_duration).await?;

            match received {
                Some(msg) => messages.push(msg),
                None => break,
            }
        }

        Ok(messages)
    }

    async fn complete_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut storage = self.storage.write().unwrap();
        let now = Timestamp::now();

        for queue in storage.queues.values_mut() {
            if let Some(inflight) = queue.in_flight.get(receipt.handle()) {
                if inflight.lock_expires_at <= now {
                    queue.in_flight.remove(receipt.handle());
                    return Err(QueueError::MessageNotFound {
                        receipt: receipt.handle().to_string(),
                    });
                }

                if let Some(inflight) = queue.in_flight.remove(receipt.handle()) {
                    if let Some(key) = &inflight.message.uniqueness_key {
                        queue.pending_uniqueness_keys.remove(key);
                    }
                }
                return Ok(());
            }
        }

        Err(QueueError::MessageNotFound {
            receipt: receipt.handle().to_string(),
        })
    }

    async fn abandon_message(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut storage = self.storage.write().unwrap();
        let now = Timestamp::now();

        for queue in storage.queues.values_mut() {
            if let Some(inflight) = queue.in_flight.remove(receipt.handle()) {
                if inflight.lock_expires_at <= now {
                    return Err(QueueError::MessageNotFound {
                        receipt: receipt.handle().to_string(),
                    });
                }

                let mut returned_message = inflight.message;
                returned_message.available_at = now;
                queue.messages.push_back(returned_message);

                return Ok(());
            }
        }

        Err(QueueError::MessageNotFound {
            receipt: receipt.handle().to_string(),
        })
    }

    async fn dead_letter_message(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
    ) -> Result<(), QueueError> {
        let mut storage = self.storage.write().unwrap();

        for queue in storage.queues.values_mut() {
            if let Some(inflight) = queue.in_flight.remove(receipt.handle()) {
                if let Some(key) = &inflight.message.uniqueness_key {
                    queue.pending_uniqueness_keys.remove(key);
                }

                let mut dead_message = inflight.message;
                dead_message
                    .attributes
                    .insert("dead_letter_reason".to_string(), reason.to_string());
                queue.dead_letter.push_back(dead_message);

                return Ok(());
            }
        }

        Err(QueueError::MessageNotFound {
            receipt: receipt.handle().to_string(),
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> u32 {
        100
    }
}
