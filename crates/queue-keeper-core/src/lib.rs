//! # Queue-Keeper Core
//!
//! Core business logic for the event delivery core of a webhook-routing
//! service: fan-out from produced events to matching subscriptions,
//! HTTP/device dispatch, retry/backoff, rate limiting, retention, and the
//! device socket hub.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions (see [repositories]).
//! - Infrastructure implementations are injected at runtime.
//! - All external dependencies are abstracted behind traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for queue-keeper operations
pub type QueueKeeperResult<T> = Result<T, QueueKeeperError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

macro_rules! ulid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a new unique identifier
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Get string representation
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
                    expected: "ULID format".to_string(),
                    actual: s.to_string(),
                })?;
                Ok(Self(ulid))
            }
        }
    };
}

ulid_id!(EventId, "Unique identifier for an event, lexicographically sortable by creation time");
ulid_id!(GroupId, "Tenant/project boundary identifier");
ulid_id!(SourceId, "Inbound channel (webhook or poller feed) identifier");
ulid_id!(ApplicationId, "Application identifier for outgoing groups");
ulid_id!(DeviceId, "Long-lived socket client identifier");
ulid_id!(SubscriptionId, "Durable routing rule identifier");
ulid_id!(DeliveryId, "Identifier for one (event, subscription) delivery attempt record");

/// Identifier for tracing requests across system boundaries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get string representation
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
            expected: "UUID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(uuid))
    }
}

// ============================================================================
// Time
// ============================================================================

/// UTC timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Wrap an existing `DateTime<Utc>`
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Produce a new timestamp offset by `delta` (may be negative)
    pub fn add(&self, delta: chrono::Duration) -> Self {
        Self(self.0 + delta)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Group / Source
// ============================================================================

/// Tenant boundary type: `Incoming` groups are source-driven, `Outgoing`
/// groups are application-driven (§3, §4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    Incoming,
    Outgoing,
}

/// Tenant boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub group_type: GroupType,
    pub retention_horizon: chrono::Duration,
    pub rate_limit_count: u32,
    pub rate_limit_period: chrono::Duration,
}

/// An inbound channel (webhook or poller feed). Read-only to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub group_id: GroupId,
}

// ============================================================================
// Device
// ============================================================================

/// Device presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// A long-lived client attached via socket (§3, §4.I)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub group_id: GroupId,
    pub application_id: ApplicationId,
    pub host_name: String,
    pub status: DeviceStatus,
    pub last_seen: Timestamp,
}

// ============================================================================
// Event
// ============================================================================

/// Owner of an event: either an application (outgoing) or a source (incoming)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventOwner {
    Application(ApplicationId),
    Source(SourceId),
}

/// Immutable record of an incoming payload (§3)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub group_id: GroupId,
    pub owner: EventOwner,
    pub event_type: String,
    pub payload: bytes::Bytes,
    pub headers: std::collections::HashMap<String, String>,
    pub created_at: Timestamp,
}

// ============================================================================
// Subscription
// ============================================================================

/// Retry strategy for a subscription's deliveries (§4.D)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryStrategy {
    Linear,
    Exponential,
}

/// Per-subscription retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub strategy: RetryStrategy,
    pub max_attempts: u32,
    pub base_interval: chrono::Duration,
    pub cap: chrono::Duration,
}

/// Per-subscription rate-limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub count: u32,
    pub duration_secs: u64,
}

/// Snapshot of the HTTP endpoint a subscription dispatches to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSnapshot {
    pub url: String,
    pub secret: String,
    pub signing_scheme: String,
    pub custom_headers: std::collections::HashMap<String, String>,
}

/// Delivery target: either an HTTP endpoint snapshot or a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeliveryTarget {
    Endpoint(EndpointSnapshot),
    Device(DeviceId),
}

/// Durable routing rule from a source/application to an endpoint or device (§3)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub group_id: GroupId,
    pub application_id: Option<ApplicationId>,
    pub device_id: Option<DeviceId>,
    pub source_id: Option<SourceId>,
    pub target: DeliveryTarget,
    pub event_types: Vec<String>,
    pub retry_config: RetryConfig,
    pub rate_limit: RateLimitConfig,
}

// ============================================================================
// EventDelivery
// ============================================================================

/// Delivery state machine status (§4.G)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Scheduled,
    Processing,
    Retry,
    Success,
    Failure,
    Discarded,
}

impl DeliveryStatus {
    /// Whether this status is terminal (no further transitions occur)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Discarded)
    }
}

/// One attempt at dispatching an `EventDelivery`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub timestamp: Timestamp,
    pub response_code: Option<u16>,
    pub response_body_prefix: String,
    pub remote_ip: Option<String>,
    pub latency: chrono::Duration,
    pub error_kind: Option<String>,
}

/// One row per (Event, Subscription) (§3)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDelivery {
    pub id: DeliveryId,
    pub event_id: EventId,
    pub subscription_id: SubscriptionId,
    pub group_id: GroupId,
    pub target: DeliveryTarget,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub next_attempt_at: Option<Timestamp>,
    pub history: Vec<AttemptRecord>,
}

impl EventDelivery {
    /// Create a new, freshly scheduled delivery with zero attempts
    pub fn new_scheduled(
        event_id: EventId,
        subscription_id: SubscriptionId,
        group_id: GroupId,
        target: DeliveryTarget,
    ) -> Self {
        Self {
            id: DeliveryId::new(),
            event_id,
            subscription_id,
            group_id,
            target,
            status: DeliveryStatus::Scheduled,
            attempt_count: 0,
            next_attempt_at: None,
            history: Vec::new(),
        }
    }

    /// A terminal marker row recorded by `CreateEvent` processing when no
    /// subscription matched, or the ownership triangle check failed (§4.F
    /// steps 2-3). There is no real subscription or endpoint behind a
    /// marker, so `subscription_id`/`target` carry placeholder values;
    /// that's safe because `deliver_event` checks `status.is_terminal()`
    /// before ever touching either field.
    pub fn new_discarded_marker(event_id: EventId, group_id: GroupId, reason: &str) -> Self {
        let mut delivery = Self {
            id: DeliveryId::new(),
            event_id,
            subscription_id: SubscriptionId::new(),
            group_id,
            target: DeliveryTarget::Endpoint(EndpointSnapshot {
                url: String::new(),
                secret: String::new(),
                signing_scheme: String::new(),
                custom_headers: std::collections::HashMap::new(),
            }),
            status: DeliveryStatus::Discarded,
            attempt_count: 0,
            next_attempt_at: None,
            history: Vec::new(),
        };
        delivery.history.push(AttemptRecord {
            timestamp: Timestamp::now(),
            response_code: None,
            response_body_prefix: String::new(),
            remote_ip: None,
            latency: chrono::Duration::zero(),
            error_kind: Some(reason.to_string()),
        });
        delivery
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Deployment environment enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ParseError::InvalidFormat {
                expected: "development, staging, or production".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

/// Logging level configuration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(ParseError::InvalidFormat {
                expected: "error, warn, info, debug, or trace".to_string(),
                actual: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions (§7)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    Transient,
    Permanent,
    Security,
    Configuration,
}

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error type for queue-keeper operations
#[derive(Debug, thiserror::Error)]
pub enum QueueKeeperError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("External service error: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QueueKeeperError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ExternalService { .. } => true,
            Self::Internal { .. } => true,
            Self::Validation(_) => false,
            Self::Parse(_) => false,
            Self::Configuration { .. } => false,
        }
    }

    /// Get error category for monitoring and alerting
    pub fn error_category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Permanent,
            Self::Parse(_) => ErrorCategory::Permanent,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::ExternalService { .. } => ErrorCategory::Transient,
            Self::Internal { .. } => ErrorCategory::Transient,
        }
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Retry backoff calculation (§4.D)
pub mod retry;

/// Per-key token-bucket rate limiting (§4.B)
pub mod rate_limiter;

/// Subscription matching against events (§4.C)
pub mod resolver;

/// HTTP signing, dispatch, and response classification (§4.E)
pub mod dispatcher;

/// Event-creation task: fan-out from event to deliveries (§4.F)
pub mod event_creation;

/// Event-delivery state machine (§4.G)
pub mod delivery;

/// Retention sweeps over terminal events/deliveries (§4.H)
pub mod retention;

/// Device socket hub (§4.I)
pub mod hub;

/// Repository trait abstractions and in-memory implementations (§9)
pub mod repositories;

pub use delivery::{deliver_event, DeliveryOutcome, DeliveryError};
pub use dispatcher::{DispatchOutcome, HttpDispatcher, SignatureScheme};
pub use event_creation::{create_event, EventCreationError};
pub use hub::{login, listen, DeviceHub, HubError, ListenRequest, LoginRequest, PushOutcome};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use repositories::{
    DeviceRepository, EventDeliveryRepository, EventRepository, GroupRepository, RepositoryError,
    SourceRepository, SubscriptionRepository,
};
pub use resolver::match_subscriptions;
pub use retention::{retention_sweep, RetentionError};
pub use retry::RetryPolicy;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
