//! Repository trait abstractions and in-memory implementations (§9).
//!
//! Each entity gets a narrow, capability-shaped trait rather than one
//! do-everything `Repository<T>`. Business logic (resolver, delivery,
//! retention, hub) depends only on these traits; the in-memory
//! implementations here double as both the worker process's real store and
//! the fixture used by tests.

use crate::{
    DeliveryId, Device, DeviceId, Event, EventDelivery, EventId, Group, GroupId, Source, SourceId,
    Subscription,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Errors surfaced by repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("optimistic concurrency conflict updating {entity} '{id}'")]
    Conflict { entity: String, id: String },

    #[error("repository backend error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// Whether retrying the operation might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Conflict { .. })
    }
}

/// CRUD + lookup surface for events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, event: Event) -> Result<(), RepositoryError>;
    async fn get(&self, id: EventId) -> Result<Event, RepositoryError>;

    /// Return a bounded page of events for `group_id` created at or before
    /// `before`, ordered oldest-first, for retention sweeps (§4.H).
    async fn find_by_group_before(
        &self,
        group_id: GroupId,
        before: crate::Timestamp,
        page_size: usize,
    ) -> Result<Vec<Event>, RepositoryError>;

    async fn delete(&self, id: EventId) -> Result<(), RepositoryError>;
}

/// CRUD + lookup surface for event deliveries, including the CAS update used
/// by the delivery state machine (§4.G, §5).
#[async_trait]
pub trait EventDeliveryRepository: Send + Sync {
    async fn create(&self, delivery: EventDelivery) -> Result<(), RepositoryError>;
    async fn get(&self, id: DeliveryId) -> Result<EventDelivery, RepositoryError>;

    /// Replace the stored delivery with `updated`, but only if the stored
    /// `attempt_count` still equals `expected_attempt_count`. Returns
    /// `RepositoryError::Conflict` if another writer raced ahead.
    async fn compare_and_update(
        &self,
        expected_attempt_count: u32,
        updated: EventDelivery,
    ) -> Result<(), RepositoryError>;

    /// Return a bounded page of deliveries for `group_id` created at or
    /// before `before`, ordered oldest-first, for retention sweeps (§4.H).
    async fn find_by_group_before(
        &self,
        group_id: GroupId,
        before: crate::Timestamp,
        page_size: usize,
    ) -> Result<Vec<EventDelivery>, RepositoryError>;

    async fn delete(&self, id: DeliveryId) -> Result<(), RepositoryError>;
}

/// Lookup surface for subscriptions.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_group(&self, group_id: GroupId) -> Result<Vec<Subscription>, RepositoryError>;
    async fn find_by_device(&self, device_id: DeviceId) -> Result<Subscription, RepositoryError>;
    async fn create(&self, subscription: Subscription) -> Result<(), RepositoryError>;

    /// Replace a previously-created subscription, e.g. when the hub's
    /// `Listen` operation updates a device's event-type filter list.
    async fn update(&self, subscription: Subscription) -> Result<(), RepositoryError>;
}

/// CRUD surface for devices.
#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn get(&self, id: DeviceId) -> Result<Device, RepositoryError>;
    async fn create(&self, device: Device) -> Result<(), RepositoryError>;
    async fn update(&self, device: Device) -> Result<(), RepositoryError>;
}

/// Lookup surface for inbound sources.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn get(&self, id: SourceId) -> Result<Source, RepositoryError>;
}

/// Lookup surface for tenant groups.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn get(&self, id: GroupId) -> Result<Group, RepositoryError>;

    /// All known groups, for the worker's periodic per-group retention sweep
    /// (§4.H) and source-monitoring tick.
    async fn list_all(&self) -> Result<Vec<Group>, RepositoryError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory `EventRepository`.
#[derive(Default)]
pub struct InMemoryEventRepository {
    events: RwLock<HashMap<EventId, Event>>,
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn create(&self, event: Event) -> Result<(), RepositoryError> {
        self.events.write().unwrap().insert(event.id, event);
        Ok(())
    }

    async fn get(&self, id: EventId) -> Result<Event, RepositoryError> {
        self.events
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Event".to_string(),
                id: id.to_string(),
            })
    }

    async fn find_by_group_before(
        &self,
        group_id: GroupId,
        before: crate::Timestamp,
        page_size: usize,
    ) -> Result<Vec<Event>, RepositoryError> {
        let events = self.events.read().unwrap();
        let mut matching: Vec<Event> = events
            .values()
            .filter(|e| e.group_id == group_id && e.created_at <= before)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.id.to_string());
        matching.truncate(page_size);
        Ok(matching)
    }

    async fn delete(&self, id: EventId) -> Result<(), RepositoryError> {
        self.events.write().unwrap().remove(&id);
        Ok(())
    }
}

/// In-memory `EventDeliveryRepository`.
#[derive(Default)]
pub struct InMemoryEventDeliveryRepository {
    deliveries: RwLock<HashMap<DeliveryId, EventDelivery>>,
}

#[async_trait]
impl EventDeliveryRepository for InMemoryEventDeliveryRepository {
    async fn create(&self, delivery: EventDelivery) -> Result<(), RepositoryError> {
        self.deliveries
            .write()
            .unwrap()
            .insert(delivery.id, delivery);
        Ok(())
    }

    async fn get(&self, id: DeliveryId) -> Result<EventDelivery, RepositoryError> {
        self.deliveries
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "EventDelivery".to_string(),
                id: id.to_string(),
            })
    }

    async fn compare_and_update(
        &self,
        expected_attempt_count: u32,
        updated: EventDelivery,
    ) -> Result<(), RepositoryError> {
        let mut deliveries = self.deliveries.write().unwrap();
        let current = deliveries
            .get(&updated.id)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "EventDelivery".to_string(),
                id: updated.id.to_string(),
            })?;

        if current.attempt_count != expected_attempt_count {
            return Err(RepositoryError::Conflict {
                entity: "EventDelivery".to_string(),
                id: updated.id.to_string(),
            });
        }

        deliveries.insert(updated.id, updated);
        Ok(())
    }

    async fn find_by_group_before(
        &self,
        group_id: GroupId,
        before: crate::Timestamp,
        page_size: usize,
    ) -> Result<Vec<EventDelivery>, RepositoryError> {
        let deliveries = self.deliveries.read().unwrap();
        let mut matching: Vec<EventDelivery> = deliveries
            .values()
            .filter(|d| d.group_id == group_id && d.status.is_terminal())
            .filter(|d| {
                d.history
                    .last()
                    .map(|a| a.timestamp <= before)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|d| d.id.to_string());
        matching.truncate(page_size);
        Ok(matching)
    }

    async fn delete(&self, id: DeliveryId) -> Result<(), RepositoryError> {
        self.deliveries.write().unwrap().remove(&id);
        Ok(())
    }
}

/// In-memory `SubscriptionRepository`.
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    by_group: RwLock<HashMap<GroupId, Vec<Subscription>>>,
    by_device: RwLock<HashMap<DeviceId, Subscription>>,
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn find_by_group(&self, group_id: GroupId) -> Result<Vec<Subscription>, RepositoryError> {
        Ok(self
            .by_group
            .read()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_by_device(&self, device_id: DeviceId) -> Result<Subscription, RepositoryError> {
        self.by_device
            .read()
            .unwrap()
            .get(&device_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Subscription".to_string(),
                id: device_id.to_string(),
            })
    }

    async fn create(&self, subscription: Subscription) -> Result<(), RepositoryError> {
        self.by_group
            .write()
            .unwrap()
            .entry(subscription.group_id)
            .or_default()
            .push(subscription.clone());

        if let Some(device_id) = subscription.device_id {
            self.by_device
                .write()
                .unwrap()
                .insert(device_id, subscription);
        }
        Ok(())
    }

    async fn update(&self, subscription: Subscription) -> Result<(), RepositoryError> {
        let mut by_group = self.by_group.write().unwrap();
        let group_subs = by_group.entry(subscription.group_id).or_default();
        if let Some(slot) = group_subs.iter_mut().find(|s| s.id == subscription.id) {
            *slot = subscription.clone();
        } else {
            group_subs.push(subscription.clone());
        }
        drop(by_group);

        if let Some(device_id) = subscription.device_id {
            self.by_device
                .write()
                .unwrap()
                .insert(device_id, subscription);
        }
        Ok(())
    }
}

/// In-memory `DeviceRepository`.
#[derive(Default)]
pub struct InMemoryDeviceRepository {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl InMemoryDeviceRepository {
    /// Seed a device directly, bypassing the trait (test/bootstrap helper).
    pub fn insert(&self, device: Device) {
        self.devices.write().unwrap().insert(device.id, device);
    }
}

#[async_trait]
impl DeviceRepository for InMemoryDeviceRepository {
    async fn get(&self, id: DeviceId) -> Result<Device, RepositoryError> {
        self.devices
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Device".to_string(),
                id: id.to_string(),
            })
    }

    async fn create(&self, device: Device) -> Result<(), RepositoryError> {
        self.devices.write().unwrap().insert(device.id, device);
        Ok(())
    }

    async fn update(&self, device: Device) -> Result<(), RepositoryError> {
        self.devices.write().unwrap().insert(device.id, device);
        Ok(())
    }
}

/// In-memory `SourceRepository`.
#[derive(Default)]
pub struct InMemorySourceRepository {
    sources: RwLock<HashMap<SourceId, Source>>,
}

impl InMemorySourceRepository {
    /// Seed a source directly (test/bootstrap helper).
    pub fn insert(&self, source: Source) {
        self.sources.write().unwrap().insert(source.id, source);
    }
}

#[async_trait]
impl SourceRepository for InMemorySourceRepository {
    async fn get(&self, id: SourceId) -> Result<Source, RepositoryError> {
        self.sources
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Source".to_string(),
                id: id.to_string(),
            })
    }
}

/// In-memory `GroupRepository`.
#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<GroupId, Group>>,
}

impl InMemoryGroupRepository {
    /// Seed a group directly (test/bootstrap helper).
    pub fn insert(&self, group: Group) {
        self.groups.write().unwrap().insert(group.id, group);
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn get(&self, id: GroupId) -> Result<Group, RepositoryError> {
        self.groups
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Group".to_string(),
                id: id.to_string(),
            })
    }

    async fn list_all(&self) -> Result<Vec<Group>, RepositoryError> {
        Ok(self.groups.read().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
#[path = "repositories_tests.rs"]
mod tests;
