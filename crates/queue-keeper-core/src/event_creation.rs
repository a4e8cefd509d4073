//! Event-creation task: fan-out from an incoming event to deliveries (§4.F).
//!
//! `CreateEvent` persists the event idempotently, resolves matching
//! subscriptions, creates one `EventDelivery` row per match, and enqueues one
//! `EventDeliver` task per delivery, keyed by `delivery_id` as the queue
//! uniqueness key so a redelivered `CreateEvent` task never double-enqueues.

use crate::resolver::match_subscriptions;
use crate::{
    DeliveryId, Event, EventDelivery, EventDeliveryRepository, EventOwner, EventRepository,
    GroupRepository, GroupType, RepositoryError, SourceRepository, SubscriptionRepository,
};
use queue_runtime::{Message, QueueClient, QueueError};

/// Errors that can occur while creating an event and fanning it out.
#[derive(Debug, thiserror::Error)]
pub enum EventCreationError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl EventCreationError {
    /// Whether the caller should retry the whole `CreateEvent` task.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Repository(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
        }
    }
}

/// Task kind used for enqueuing individual delivery attempts (§6).
pub const EVENT_DELIVER_TASK_KIND: &str = "event.deliver";

/// The queue name events are fanned out onto.
pub const DELIVERY_QUEUE: &str = "event-deliveries";

/// Task kind a `CreateEvent{event_id}` message is enqueued under (§6).
pub const CREATE_EVENT_TASK_KIND: &str = "event.create";

/// The queue a worker's `CreateEvent` consumer polls.
pub const EVENTS_QUEUE: &str = "events";

/// Persist `event`, validate its group/application/source ownership
/// triangle, resolve its matching subscriptions, create one
/// `EventDelivery` per match, and enqueue one `EventDeliver` task per
/// delivery. Partial failure (some deliveries enqueued, some not) is
/// surfaced as an error so the whole `CreateEvent` task is retried; the
/// per-delivery uniqueness key keeps the retry idempotent.
#[allow(clippy::too_many_arguments)]
pub async fn create_event(
    event: Event,
    event_repo: &dyn EventRepository,
    delivery_repo: &dyn EventDeliveryRepository,
    subscription_repo: &dyn SubscriptionRepository,
    group_repo: &dyn GroupRepository,
    source_repo: &dyn SourceRepository,
    queue_client: &dyn QueueClient,
) -> Result<Vec<DeliveryId>, EventCreationError> {
    event_repo.create(event.clone()).await?;

    if let Some(reason) = ownership_mismatch(&event, group_repo, source_repo).await? {
        return discard_marker(delivery_repo, &event, &reason).await;
    }

    let candidates = subscription_repo.find_by_group(event.group_id).await?;
    let matches = match_subscriptions(&event, &candidates);

    if matches.is_empty() {
        return discard_marker(delivery_repo, &event, "no-subscribers").await;
    }

    let mut delivery_ids = Vec::with_capacity(matches.len());

    for subscription in matches {
        let delivery = EventDelivery::new_scheduled(
            event.id,
            subscription.id,
            event.group_id,
            subscription.target.clone(),
        );
        delivery_repo.create(delivery.clone()).await?;

        let queue_name = queue_runtime::QueueName::new(DELIVERY_QUEUE.to_string())
            .expect("DELIVERY_QUEUE is a valid static queue name");
        let message = Message::new(
            EVENT_DELIVER_TASK_KIND,
            bytes::Bytes::from(delivery.id.to_string()),
        )
        .with_uniqueness_key(delivery.id.to_string());

        queue_client.send_message(&queue_name, message).await?;
        delivery_ids.push(delivery.id);
    }

    Ok(delivery_ids)
}

/// Validate the group/application/source ownership triangle (step 2).
/// Returns `Some(reason)` if the event should be discarded instead of
/// resolved, `None` if ownership checks out. `Application` has no
/// standalone entity/repository in this data model (only the opaque
/// `ApplicationId` embedded in events/subscriptions/devices), so an
/// application-owned event is checked against its group's type only.
async fn ownership_mismatch(
    event: &Event,
    group_repo: &dyn GroupRepository,
    source_repo: &dyn SourceRepository,
) -> Result<Option<String>, RepositoryError> {
    let group = match group_repo.get(event.group_id).await {
        Ok(group) => group,
        Err(RepositoryError::NotFound { .. }) => return Ok(Some("group not found".to_string())),
        Err(e) => return Err(e),
    };

    match &event.owner {
        EventOwner::Source(source_id) => {
            if group.group_type != GroupType::Incoming {
                return Ok(Some(
                    "source-owned event in a non-incoming group".to_string(),
                ));
            }
            match source_repo.get(*source_id).await {
                Ok(source) if source.group_id == event.group_id => Ok(None),
                Ok(_) => Ok(Some("source belongs to a different group".to_string())),
                Err(RepositoryError::NotFound { .. }) => Ok(Some("source not found".to_string())),
                Err(e) => Err(e),
            }
        }
        EventOwner::Application(_) => {
            if group.group_type != GroupType::Outgoing {
                return Ok(Some(
                    "application-owned event in a non-outgoing group".to_string(),
                ));
            }
            Ok(None)
        }
    }
}

/// Persist a terminal `Discarded` marker delivery for `event` and return its
/// id as the sole element of the created-deliveries list (step 3, §8
/// testable property 1).
async fn discard_marker(
    delivery_repo: &dyn EventDeliveryRepository,
    event: &Event,
    reason: &str,
) -> Result<Vec<DeliveryId>, EventCreationError> {
    let marker = EventDelivery::new_discarded_marker(event.id, event.group_id, reason);
    delivery_repo.create(marker.clone()).await?;
    Ok(vec![marker.id])
}

#[cfg(test)]
#[path = "event_creation_tests.rs"]
mod tests;
