//! # Queue Runtime
//!
//! Provider-agnostic queue runtime for reliable task dispatch.
//!
//! This library provides:
//! - Provider-agnostic enqueue/receive operations
//! - Scheduled delivery and visibility-timeout redelivery
//! - Dead letter queue support
//! - Uniqueness-key duplicate suppression
//! - Batch operations where supported
//!
//! ## Module Organization
//!
//! - [error] - Error types for all queue operations
//! - [message] - Message structures and receipt handles
//! - [provider] - Provider types and configuration
//! - [providers] - Concrete `QueueProvider` implementations
//! - [client] - Client traits and implementations

// Module declarations
pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, SendOptions, ReceiveOptions,
    Timestamp,
};
pub use provider::{InMemoryConfig, ProviderConfig, ProviderType, QueueConfig};
pub use providers::InMemoryProvider;
