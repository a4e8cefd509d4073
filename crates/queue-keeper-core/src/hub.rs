//! Device socket hub (§4.I).
//!
//! A stateful, in-process registry of connected devices. `login` and
//! `listen` are plain request/response operations backed by the repository
//! traits; `DeviceHub` itself only tracks who is currently online and holds
//! each device's bounded outbound push queue. A device has at most one
//! `Online` presence entry at a time (§8, testable property 5) because
//! registering a device simply overwrites any existing entry for that id.

use crate::{
    Device, DeviceId, DeviceRepository, DeviceStatus, EventDelivery, Group, GroupType,
    RepositoryError, Source, SourceId, SourceRepository, Subscription, SubscriptionRepository,
};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};

/// Capacity of a single device's outbound push queue (§4.I, §5). Overflow
/// yields `nack` rather than blocking the dispatcher.
const PUSH_QUEUE_CAPACITY: usize = 64;

/// Default per-attempt ack deadline (§4.I, §5) when the caller doesn't wire
/// one in from `WorkerConfig`.
const DEFAULT_ACK_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Structured error returned by hub operations, carrying an HTTP-style code
/// and the stable, user-visible message required by §6.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("this device cannot access this project")]
    WrongGroup,
    #[error("this device cannot access this application")]
    WrongApplication,
    #[error("this device cannot access this source")]
    WrongSource,
    #[error("device not found")]
    DeviceNotFound,
    #[error("failed to find device by id")]
    DeviceLookupFailed,
    #[error("failed to create new device")]
    DeviceCreateFailed,
    #[error("failed to update device to online")]
    DeviceUpdateFailed,
    #[error("failed to find source")]
    SourceLookupFailed,
    #[error("failed to find subscription by id")]
    SubscriptionLookupFailed,
    #[error("failed to create new subscription")]
    SubscriptionCreateFailed,
}

impl HubError {
    /// HTTP-style status code for this error (§6, §7).
    pub fn http_status(&self) -> u16 {
        match self {
            HubError::WrongGroup | HubError::WrongApplication | HubError::WrongSource => 401,
            _ => 400,
        }
    }

    /// The stable, user-visible message (identical to `Display`).
    pub fn message(&self) -> String {
        self.to_string()
    }
}

/// Request body for the `login` wire message.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub host_name: String,
    pub device_id: Option<DeviceId>,
}

/// Request body for the `listen` wire message.
#[derive(Debug, Clone)]
pub struct ListenRequest {
    pub device_id: DeviceId,
    pub source_id: Option<SourceId>,
    pub event_types: Vec<String>,
}

/// Register a device (creating one if `request.device_id` is absent) and
/// reset it to `Offline`. `Listen` is the only operation that marks a device
/// `Online` (DESIGN.md Open Question 1).
pub async fn login(
    group: &Group,
    application_id: crate::ApplicationId,
    request: LoginRequest,
    device_repo: &dyn DeviceRepository,
) -> Result<Device, HubError> {
    let device = match request.device_id {
        None => {
            let device = Device {
                id: DeviceId::new(),
                group_id: group.id,
                application_id,
                host_name: request.host_name,
                status: DeviceStatus::Offline,
                last_seen: crate::Timestamp::now(),
            };
            device_repo
                .create(device.clone())
                .await
                .map_err(|_| HubError::DeviceCreateFailed)?;
            device
        }
        Some(device_id) => {
            let existing = device_repo
                .get(device_id)
                .await
                .map_err(|_| HubError::DeviceLookupFailed)?;

            if existing.group_id != group.id {
                return Err(HubError::WrongGroup);
            }
            if existing.application_id != application_id {
                return Err(HubError::WrongApplication);
            }

            if existing.status == DeviceStatus::Offline {
                existing
            } else {
                let reset = Device {
                    status: DeviceStatus::Offline,
                    ..existing
                };
                device_repo
                    .update(reset.clone())
                    .await
                    .map_err(|_| HubError::DeviceUpdateFailed)?;
                reset
            }
        }
    };

    Ok(device)
}

/// Verify ownership, then find-or-create the device's subscription and
/// register it online in `hub`.
pub async fn listen(
    group: &Group,
    application_id: crate::ApplicationId,
    request: ListenRequest,
    hub: &DeviceHub,
    device_repo: &dyn DeviceRepository,
    source_repo: &dyn SourceRepository,
    subscription_repo: &dyn SubscriptionRepository,
) -> Result<Device, HubError> {
    let device = device_repo
        .get(request.device_id)
        .await
        .map_err(|_| HubError::DeviceNotFound)?;

    if device.group_id != group.id {
        return Err(HubError::WrongGroup);
    }
    if device.application_id != application_id {
        return Err(HubError::WrongApplication);
    }

    if group.group_type == GroupType::Incoming {
        let source_id = request.source_id.ok_or(HubError::SourceLookupFailed)?;
        let source: Source = source_repo
            .get(source_id)
            .await
            .map_err(|_| HubError::SourceLookupFailed)?;
        if source.group_id != group.id {
            return Err(HubError::WrongSource);
        }
    }

    match subscription_repo.find_by_device(device.id).await {
        Ok(mut subscription) => {
            subscription.event_types = request.event_types;
            subscription_repo
                .update(subscription)
                .await
                .map_err(|_| HubError::SubscriptionLookupFailed)?;
        }
        Err(RepositoryError::NotFound { .. }) => {
            let subscription = Subscription {
                id: crate::SubscriptionId::new(),
                group_id: group.id,
                application_id: Some(application_id),
                device_id: Some(device.id),
                source_id: request.source_id,
                target: crate::DeliveryTarget::Device(device.id),
                event_types: request.event_types,
                retry_config: crate::RetryConfig {
                    strategy: crate::RetryStrategy::Exponential,
                    max_attempts: 5,
                    base_interval: chrono::Duration::seconds(10),
                    cap: chrono::Duration::seconds(60),
                },
                rate_limit: crate::RateLimitConfig {
                    count: group.rate_limit_count,
                    duration_secs: group.rate_limit_period.num_seconds().max(1) as u64,
                },
            };
            subscription_repo
                .create(subscription)
                .await
                .map_err(|_| HubError::SubscriptionCreateFailed)?;
        }
        Err(_) => return Err(HubError::SubscriptionLookupFailed),
    }

    hub.register_online(device.id).await;
    info!(device_id = %device.id, group_id = %group.id, "device listening");

    Ok(device)
}

/// One device's live connection state: its outbound push queue.
struct DeviceConnection {
    sender: mpsc::Sender<PushCommand>,
}

/// A push command sent to a device's consumer task.
#[derive(Debug, Clone)]
pub struct PushCommand {
    pub delivery_id: crate::DeliveryId,
    pub event_type: String,
    pub payload: bytes::Bytes,
    pub headers: HashMap<String, String>,
}

/// Outcome of pushing a delivery to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Ack,
    Nack,
    Timeout,
    Offline,
}

/// What a device's inbound `ack`/`nack` wire frame resolves a pending push
/// to. A frame-parsing socket layer (out of scope here, per §6's protocol
/// framing) calls [`DeviceHub::ack`]/[`DeviceHub::nack`] with the frame's
/// `delivery_id`; this is the hand-off point it feeds into.
enum AckFrame {
    Ack,
    Nack(String),
}

/// In-process registry of online devices, their outbound push queues, and
/// pending acks awaiting a wire-protocol response.
pub struct DeviceHub {
    connections: RwLock<HashMap<DeviceId, DeviceConnection>>,
    pending_acks: RwLock<HashMap<crate::DeliveryId, oneshot::Sender<AckFrame>>>,
    ack_timeout: StdDuration,
}

impl Default for DeviceHub {
    fn default() -> Self {
        Self::with_ack_timeout(DEFAULT_ACK_TIMEOUT)
    }
}

impl DeviceHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a hub whose per-attempt ack deadline (§4.I, §5) is `ack_timeout`
    /// instead of the default, e.g. from `WorkerConfig`.
    pub fn with_ack_timeout(ack_timeout: StdDuration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            pending_acks: RwLock::new(HashMap::new()),
            ack_timeout,
        }
    }

    /// Mark `device_id` online, replacing any prior connection for it so at
    /// most one presence entry exists per device (§8, testable property 5).
    pub async fn register_online(&self, device_id: DeviceId) -> mpsc::Receiver<PushCommand> {
        let (sender, receiver) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        self.connections
            .write()
            .await
            .insert(device_id, DeviceConnection { sender });
        receiver
    }

    /// Refresh presence on a ping; a no-op if the device isn't registered.
    pub async fn ping(&self, device_id: DeviceId) -> bool {
        self.connections.read().await.contains_key(&device_id)
    }

    /// Remove a device's presence entry.
    pub async fn disconnect(&self, device_id: DeviceId) {
        self.connections.write().await.remove(&device_id);
    }

    pub async fn is_online(&self, device_id: DeviceId) -> bool {
        self.connections.read().await.contains_key(&device_id)
    }

    /// Resolve a pending push as acked. Called with the `delivery_id` carried
    /// by a `{type:"ack", delivery_id}` wire frame (§6). A no-op if nothing
    /// is waiting on that delivery (already timed out, or never pushed).
    pub async fn ack(&self, delivery_id: crate::DeliveryId) {
        if let Some(responder) = self.pending_acks.write().await.remove(&delivery_id) {
            let _ = responder.send(AckFrame::Ack);
        }
    }

    /// Resolve a pending push as nacked. Called with the `delivery_id` and
    /// `reason` carried by a `{type:"nack", delivery_id, reason}` wire frame.
    pub async fn nack(&self, delivery_id: crate::DeliveryId, reason: String) {
        if let Some(responder) = self.pending_acks.write().await.remove(&delivery_id) {
            let _ = responder.send(AckFrame::Nack(reason));
        }
    }

    /// Push a delivery to its target device and wait for the device to ack,
    /// nack, or go silent past the ack deadline. Returns `Offline` immediately
    /// if the device has no live connection or its queue is full; otherwise
    /// blocks (up to `ack_timeout`) for the matching `ack`/`nack` wire frame.
    pub async fn push(
        &self,
        device_id: DeviceId,
        delivery: &EventDelivery,
        event_type: &str,
        payload: bytes::Bytes,
        headers: HashMap<String, String>,
    ) -> PushOutcome {
        let sender = {
            let connections = self.connections.read().await;
            let Some(connection) = connections.get(&device_id) else {
                return PushOutcome::Offline;
            };
            connection.sender.clone()
        };

        let command = PushCommand {
            delivery_id: delivery.id,
            event_type: event_type.to_string(),
            payload,
            headers,
        };

        let (responder, awaiting) = oneshot::channel();
        self.pending_acks
            .write()
            .await
            .insert(delivery.id, responder);

        if let Err(e) = sender.try_send(command) {
            self.pending_acks.write().await.remove(&delivery.id);
            return match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!(device_id = %device_id, "push queue full, nacking delivery");
                    PushOutcome::Nack
                }
                mpsc::error::TrySendError::Closed(_) => PushOutcome::Offline,
            };
        }

        match tokio::time::timeout(self.ack_timeout, awaiting).await {
            Ok(Ok(AckFrame::Ack)) => PushOutcome::Ack,
            Ok(Ok(AckFrame::Nack(reason))) => {
                warn!(device_id = %device_id, delivery_id = %delivery.id, reason, "device nacked delivery");
                PushOutcome::Nack
            }
            // Responder dropped without a frame, e.g. the device disconnected.
            Ok(Err(_)) => PushOutcome::Offline,
            Err(_) => {
                self.pending_acks.write().await.remove(&delivery.id);
                warn!(device_id = %device_id, delivery_id = %delivery.id, "push ack deadline exceeded");
                PushOutcome::Timeout
            }
        }
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
