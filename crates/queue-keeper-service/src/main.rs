//! # Queue-Keeper Worker
//!
//! Binary entry point for the event-delivery core's worker process.
//!
//! This executable:
//! - Loads configuration from environment and files
//! - Initializes structured logging
//! - Wires up the in-memory repositories and queue client
//! - Spawns the per-task-kind worker loops
//! - Serves the `/metrics` + `/health` HTTP surface until shutdown

use queue_keeper_core::repositories::{
    InMemoryDeviceRepository, InMemoryEventDeliveryRepository, InMemoryEventRepository,
    InMemoryGroupRepository, InMemorySourceRepository, InMemorySubscriptionRepository,
};
use queue_keeper_core::{dispatcher::HttpDispatcher, hub::DeviceHub, rate_limiter::RateLimiter};
use queue_keeper_service::{
    load_config, start_server, ConfigError, ServiceError, ServiceMetrics, WorkerContext,
};
use queue_runtime::{QueueClientFactory, QueueConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "queue_keeper_service=info,queue_keeper_core=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting queue-keeper worker");

    let config = load_config().unwrap_or_else(|e: ConfigError| {
        error!(error = %e, "invalid configuration, falling back to defaults");
        queue_keeper_service::ServiceConfig::default()
    });

    let queue_client = Arc::from(
        QueueClientFactory::create_client(QueueConfig::default())
            .await
            .map_err(|e| {
                error!(error = %e, "failed to create queue client");
                e
            })?,
    );

    let metrics = ServiceMetrics::new().map_err(|e| {
        error!(error = %e, "failed to register prometheus metrics");
        e
    })?;

    let ctx = WorkerContext {
        queue_client,
        event_repo: Arc::new(InMemoryEventRepository::default()),
        delivery_repo: Arc::new(InMemoryEventDeliveryRepository::default()),
        subscription_repo: Arc::new(InMemorySubscriptionRepository::default()),
        group_repo: Arc::new(InMemoryGroupRepository::default()),
        source_repo: Arc::new(InMemorySourceRepository::default()),
        dispatcher: Arc::new(HttpDispatcher::new()?),
        rate_limiter: Arc::new(RateLimiter::new()),
        hub: Arc::new(DeviceHub::with_ack_timeout(std::time::Duration::from_secs(
            config.workers.push_ack_timeout_secs,
        ))),
        metrics: metrics.clone(),
    };
    // Registered but not yet wired into a worker loop; reserved for a future
    // device-registration HTTP surface.
    let _device_repo = Arc::new(InMemoryDeviceRepository::default());

    let handles = queue_keeper_service::spawn_workers(ctx, &config.workers);

    info!(
        host = %config.server.host,
        port = config.server.port,
        "starting HTTP surface"
    );

    if let Err(e) = start_server(&config.server, metrics).await {
        error!(error = %e, "HTTP server failed");

        handles.create_event.abort();
        handles.event_deliver.abort();
        handles.retention.abort();
        handles.monitor_sources.abort();

        let exit_code = match e {
            ServiceError::BindFailed { .. } => 1,
            ServiceError::ServerFailed { .. } => 2,
        };
        std::process::exit(exit_code);
    }

    Ok(())
}
