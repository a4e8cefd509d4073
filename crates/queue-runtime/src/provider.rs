//! Provider types and configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    InMemory,
}

impl ProviderType {
    /// Check if provider supports batch operations
    pub fn supports_batching(&self) -> bool {
        match self {
            Self::InMemory => true,
        }
    }

    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    pub default_timeout: Duration,
    pub max_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub enable_dead_letter: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            default_timeout: Duration::seconds(30),
            max_retry_attempts: 3,
            retry_base_delay: Duration::seconds(1),
            enable_dead_letter: true,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    InMemory(InMemoryConfig),
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    pub max_queue_size: usize,
    pub max_delivery_count: u32,
    pub default_message_ttl: Option<Duration>,
    pub enable_dead_letter_queue: bool,
    pub visibility_timeout: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            max_delivery_count: 3,
            default_message_ttl: None,
            enable_dead_letter_queue: true,
            visibility_timeout: Duration::minutes(5),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
