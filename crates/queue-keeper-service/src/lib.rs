//! # Queue-Keeper Worker Service
//!
//! The worker process for the event-delivery core: it pulls `CreateEvent`
//! and `EventDeliver` tasks off the queue, runs them through
//! `queue-keeper-core`'s business logic, and ticks the periodic `Retention`
//! and `MonitorSources` sweeps. Its HTTP surface is deliberately small —
//! `/metrics` and `/health` only (§6, §10) — since request ingestion is an
//! out-of-scope collaborator.

pub mod worker;

use axum::{response::Json, routing::get, Router};
use prometheus::{Encoder, Histogram, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder};
use queue_keeper_core::{Environment, LogLevel};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub use worker::{spawn_workers, WorkerContext, WorkerHandles};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the worker's HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<ServiceMetrics>,
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub workers: WorkerConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            workers: WorkerConfig::default(),
        }
    }
}

/// HTTP server configuration for the `/metrics`+`/health` surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5006,
        }
    }
}

/// Logging configuration, carrying the ambient `Environment`/`LogLevel`
/// types (§10) used to set up `tracing-subscriber` filtering in `main`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub environment: Environment,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            environment: Environment::Development,
            json_format: false,
        }
    }
}

/// Per-task-kind concurrency and tick configuration, mirroring
/// `cmd/worker.go`'s consumer registration list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub create_event_concurrency: usize,
    pub event_deliver_concurrency: usize,
    pub retention_interval_secs: u64,
    pub monitor_sources_interval_secs: u64,
    pub receive_timeout_secs: u64,
    /// Per-attempt ack deadline for device-targeted pushes through the hub
    /// (§4.I, §5): how long `deliver_event` waits for an `ack`/`nack` wire
    /// frame before treating the attempt as a timeout.
    pub push_ack_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            create_event_concurrency: 4,
            event_deliver_concurrency: 8,
            retention_interval_secs: 3600,
            monitor_sources_interval_secs: 300,
            receive_timeout_secs: 10,
            push_ack_timeout_secs: 30,
        }
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Load configuration from `config/*.toml` plus `QUEUE_KEEPER_*` environment
/// overrides, following the precedence the teacher's `ServiceConfig` used.
pub fn load_config() -> Result<ServiceConfig, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/worker").required(false))
        .add_source(config::Environment::with_prefix("QUEUE_KEEPER").separator("__"));

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Invalid { message: e.to_string() })?;

    match settings.try_deserialize::<ServiceConfig>() {
        Ok(config) => Ok(config),
        Err(_) => Ok(ServiceConfig::default()),
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Service-level errors surfaced by `start_server` (drives `main`'s exit code).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("server failed: {message}")]
    ServerFailed { message: String },
}

/// Build the worker's HTTP surface: `/metrics` and `/health` only (§6).
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health_check))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

async fn handle_health_check() -> Json<&'static str> {
    Json("queue-keeper")
}

async fn handle_metrics(
    axum::extract::State(_state): axum::extract::State<AppState>,
) -> Result<String, axum::http::StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)
}

/// Bind and serve the worker's HTTP surface until the process exits.
pub async fn start_server(config: &ServerConfig, metrics: Arc<ServiceMetrics>) -> Result<(), ServiceError> {
    let state = AppState { metrics };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e: std::net::AddrParseError| ServiceError::BindFailed {
            address: format!("{}:{}", config.host, config.port),
            message: e.to_string(),
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!(%addr, "worker HTTP surface listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| ServiceError::ServerFailed { message: e.to_string() })
}

// ============================================================================
// Metrics
// ============================================================================

/// Prometheus metrics for the worker process (§6 "Metrics surface").
pub struct ServiceMetrics {
    /// Messages waiting, labeled by task kind (`event.create`, `event.deliver`).
    pub queue_depth: IntGaugeVec,
    /// Tasks currently being processed, labeled by task kind.
    pub in_flight: IntGaugeVec,
    pub deliveries_success_total: IntCounterVec,
    pub deliveries_failure_total: IntCounterVec,
    pub deliveries_retry_total: IntCounterVec,
    pub delivery_latency_seconds: Histogram,
    pub devices_online: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        use prometheus::{
            register_histogram, register_int_counter_vec, register_int_gauge,
            register_int_gauge_vec,
        };

        Ok(Arc::new(Self {
            queue_depth: register_int_gauge_vec!(
                "queue_keeper_queue_depth_messages",
                "Messages waiting in queue, by task kind",
                &["kind"]
            )?,
            in_flight: register_int_gauge_vec!(
                "queue_keeper_in_flight_tasks",
                "Tasks currently being processed, by task kind",
                &["kind"]
            )?,
            deliveries_success_total: register_int_counter_vec!(
                "queue_keeper_deliveries_success_total",
                "Deliveries that reached a terminal Success status, by group",
                &["group_id"]
            )?,
            deliveries_failure_total: register_int_counter_vec!(
                "queue_keeper_deliveries_failure_total",
                "Deliveries that reached a terminal Failure/Discarded status, by group",
                &["group_id"]
            )?,
            deliveries_retry_total: register_int_counter_vec!(
                "queue_keeper_deliveries_retry_total",
                "Delivery attempts that were retried, by group",
                &["group_id"]
            )?,
            delivery_latency_seconds: register_histogram!(
                "queue_keeper_delivery_latency_seconds",
                "End-to-end time from CreateEvent to a terminal delivery status",
                vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
            )?,
            devices_online: register_int_gauge!(
                "queue_keeper_devices_online",
                "Devices currently registered as online in the socket hub"
            )?,
        }))
    }
}

/// A single process-wide `ServiceMetrics` for tests: `prometheus`'s default
/// registry rejects re-registering the same metric name, so every test in
/// this crate that needs metrics shares one instance instead of building
/// its own.
#[cfg(test)]
pub(crate) fn test_metrics() -> Arc<ServiceMetrics> {
    static METRICS: std::sync::OnceLock<Arc<ServiceMetrics>> = std::sync::OnceLock::new();
    METRICS
        .get_or_init(|| ServiceMetrics::new().expect("test metrics registration"))
        .clone()
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
