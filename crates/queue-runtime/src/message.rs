//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use crate::provider::ProviderType;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > 260 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-260 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, hyphens, and underscores allowed".to_string(),
            });
        }

        if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "no leading/trailing hyphens or consecutive hyphens".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Create queue name with prefix
    pub fn with_prefix(prefix: &str, base_name: &str) -> Result<Self, ValidationError> {
        let full_name = format!("{}-{}", prefix, base_name);
        Self::new(full_name)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4();
        Self(id.to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Produce a new timestamp offset by `delta` (may be negative).
    pub fn add(&self, delta: Duration) -> Self {
        Self(self.0 + delta)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message to be sent through the queue system.
///
/// `task_kind` and `uniqueness_key` implement the 4.A queue contract:
/// consumers dispatch on `task_kind`, and a pending send sharing an
/// already-enqueued `uniqueness_key` is suppressed rather than duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub task_kind: String,
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub correlation_id: Option<String>,
    pub time_to_live: Option<Duration>,
    pub uniqueness_key: Option<String>,
    pub max_retries: Option<u32>,
    /// When set, the message is not delivered to a consumer until this time
    /// (the `options.delay` half of the 4.A `Enqueue` contract).
    pub visible_after: Option<Timestamp>,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Create new message with a task kind and body
    pub fn new(task_kind: impl Into<String>, body: Bytes) -> Self {
        Self {
            task_kind: task_kind.into(),
            body,
            attributes: HashMap::new(),
            correlation_id: None,
            time_to_live: None,
            uniqueness_key: None,
            max_retries: None,
            visible_after: None,
        }
    }

    /// Add message attribute
    pub fn with_attribute(mut self, key: String, value: String) -> Self {
        self.attributes.insert(key, value);
        self
    }

    /// Add correlation ID for tracking
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Add time-to-live for message expiration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Suppress duplicate enqueues sharing this key within the provider's window
    pub fn with_uniqueness_key(mut self, key: impl Into<String>) -> Self {
        self.uniqueness_key = Some(key.into());
        self
    }

    /// Override the per-kind default maximum delivery attempts
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Delay delivery by `delay` from the moment this message is sent.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.visible_after = Some(Timestamp::now().add(delay));
        self
    }
}

/// A message received from the queue with processing metadata
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub task_kind: String,
    pub body: Bytes,
    pub attributes: HashMap<String, String>,
    pub correlation_id: Option<String>,
    pub receipt_handle: ReceiptHandle,
    pub delivery_count: u32,
    pub first_delivered_at: Timestamp,
    pub delivered_at: Timestamp,
}

impl ReceivedMessage {
    /// Convert back to Message (for forwarding/replaying)
    pub fn message(&self) -> Message {
        Message {
            task_kind: self.task_kind.clone(),
            body: self.body.clone(),
            attributes: self.attributes.clone(),
            correlation_id: self.correlation_id.clone(),
            time_to_live: None,
            uniqueness_key: None,
            max_retries: None,
            visible_after: None,
        }
    }

    /// Check if message has exceeded maximum delivery count
    pub fn has_exceeded_max_delivery_count(&self, max_count: u32) -> bool {
        self.delivery_count > max_count
    }
}

/// Opaque token for acknowledging or rejecting received messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    handle: String,
    expires_at: Timestamp,
    provider_type: ProviderType,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: String, expires_at: Timestamp, provider_type: ProviderType) -> Self {
        Self {
            handle,
            expires_at,
            provider_type,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Check if receipt handle is expired
    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expires_at
    }

    /// Get time until expiry
    pub fn time_until_expiry(&self) -> Duration {
        let now = Timestamp::now();
        if now >= self.expires_at {
            Duration::zero()
        } else {
            self.expires_at.as_datetime() - now.as_datetime()
        }
    }

    /// Get provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider_type
    }
}

// ============================================================================
// Send and Receive Options
// ============================================================================

/// Configuration options for sending messages to queues
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Correlation ID for request/response and tracing patterns
    pub correlation_id: Option<String>,
    /// Scheduled delivery time for delayed message processing
    pub scheduled_enqueue_time: Option<Timestamp>,
    /// Time-to-live for automatic message expiration
    pub time_to_live: Option<Duration>,
    /// Custom properties for metadata and routing information
    pub properties: HashMap<String, String>,
    /// Content type override for specialized message formats
    pub content_type: Option<String>,
}

impl SendOptions {
    /// Create new send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set correlation ID for tracing
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set scheduled delivery time
    pub fn with_scheduled_enqueue_time(mut self, time: Timestamp) -> Self {
        self.scheduled_enqueue_time = Some(time);
        self
    }

    /// Set scheduled delivery with a delay from now
    pub fn with_delay(mut self, delay: Duration) -> Self {
        let scheduled_time = Timestamp::from_datetime(Utc::now() + delay);
        self.scheduled_enqueue_time = Some(scheduled_time);
        self
    }

    /// Set time-to-live for message expiration
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Add a custom property
    pub fn with_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Set content type
    pub fn with_content_type(mut self, content_type: String) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// Configuration options for receiving messages from queues
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Maximum number of messages to receive in a batch
    pub max_messages: u32,
    /// Timeout duration for receive operations
    pub timeout: Duration,
    /// Message lock duration for processing time management
    pub lock_duration: Option<Duration>,
    /// Peek-only mode for message inspection without consumption
    pub peek_only: bool,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            timeout: Duration::seconds(30),
            lock_duration: None,
            peek_only: false,
        }
    }
}

impl ReceiveOptions {
    /// Create new receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of messages to receive
    pub fn with_max_messages(mut self, max: u32) -> Self {
        self.max_messages = max;
        self
    }

    /// Set timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set message lock duration
    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = Some(duration);
        self
    }

    /// Enable peek-only mode (inspect without consuming)
    pub fn peek_only(mut self) -> Self {
        self.peek_only = true;
        self
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
