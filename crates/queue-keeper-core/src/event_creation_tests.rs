use super::*;
use crate::{
    DeliveryTarget, EndpointSnapshot, EventOwner, GroupId, GroupType, RateLimitConfig,
    RetryConfig, RetryStrategy, SourceId, SubscriptionId, Timestamp,
};
use crate::repositories::{
    InMemoryEventDeliveryRepository, InMemoryEventRepository, InMemoryGroupRepository,
    InMemorySourceRepository, InMemorySubscriptionRepository,
};
use queue_runtime::QueueClientFactory;
use std::collections::HashMap;

fn endpoint() -> DeliveryTarget {
    DeliveryTarget::Endpoint(EndpointSnapshot {
        url: "https://example.test/hook".to_string(),
        secret: "shh".to_string(),
        signing_scheme: "hmac-sha256".to_string(),
        custom_headers: HashMap::new(),
    })
}

fn retry_config() -> RetryConfig {
    RetryConfig {
        strategy: RetryStrategy::Linear,
        max_attempts: 3,
        base_interval: chrono::Duration::seconds(1),
        cap: chrono::Duration::seconds(10),
    }
}

fn incoming_group(id: GroupId) -> crate::Group {
    crate::Group {
        id,
        group_type: GroupType::Incoming,
        retention_horizon: chrono::Duration::days(1),
        rate_limit_count: 100,
        rate_limit_period: chrono::Duration::seconds(60),
    }
}

#[tokio::test]
async fn create_event_fans_out_to_matching_subscriptions() {
    let event_repo = InMemoryEventRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let group_repo = InMemoryGroupRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let queue_client = QueueClientFactory::create_test_client();

    let group = GroupId::new();
    let source = SourceId::new();
    group_repo.insert(incoming_group(group));
    source_repo.insert(crate::Source {
        id: source,
        group_id: group,
    });

    let matching_sub = Subscription {
        id: SubscriptionId::new(),
        group_id: group,
        application_id: None,
        device_id: None,
        source_id: Some(source),
        target: endpoint(),
        event_types: vec![],
        retry_config: retry_config(),
        rate_limit: RateLimitConfig {
            count: 10,
            duration_secs: 60,
        },
    };
    let other_group_sub = Subscription {
        group_id: GroupId::new(),
        ..matching_sub.clone()
    };
    subscription_repo.create(matching_sub.clone()).await.unwrap();
    subscription_repo.create(other_group_sub).await.unwrap();

    let event = Event {
        id: EventId::new(),
        group_id: group,
        owner: EventOwner::Source(source),
        event_type: "push".to_string(),
        payload: bytes::Bytes::from_static(b"{}"),
        headers: HashMap::new(),
        created_at: Timestamp::now(),
    };

    let delivery_ids = create_event(
        event.clone(),
        &event_repo,
        &delivery_repo,
        &subscription_repo,
        &group_repo,
        &source_repo,
        queue_client.as_ref(),
    )
    .await
    .unwrap();

    assert_eq!(delivery_ids.len(), 1);

    let stored_event = event_repo.get(event.id).await.unwrap();
    assert_eq!(stored_event.id, event.id);

    let delivery = delivery_repo.get(delivery_ids[0]).await.unwrap();
    assert_eq!(delivery.subscription_id, matching_sub.id);
    assert_eq!(delivery.status, crate::DeliveryStatus::Scheduled);
}

#[tokio::test]
async fn create_event_with_no_matches_persists_a_discarded_marker() {
    let event_repo = InMemoryEventRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let group_repo = InMemoryGroupRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let queue_client = QueueClientFactory::create_test_client();

    let group = GroupId::new();
    let source = SourceId::new();
    group_repo.insert(incoming_group(group));
    source_repo.insert(crate::Source {
        id: source,
        group_id: group,
    });

    let event = Event {
        id: EventId::new(),
        group_id: group,
        owner: EventOwner::Source(source),
        event_type: "push".to_string(),
        payload: bytes::Bytes::from_static(b"{}"),
        headers: HashMap::new(),
        created_at: Timestamp::now(),
    };

    let delivery_ids = create_event(
        event,
        &event_repo,
        &delivery_repo,
        &subscription_repo,
        &group_repo,
        &source_repo,
        queue_client.as_ref(),
    )
    .await
    .unwrap();

    assert_eq!(delivery_ids.len(), 1);
    let marker = delivery_repo.get(delivery_ids[0]).await.unwrap();
    assert_eq!(marker.status, crate::DeliveryStatus::Discarded);
    assert_eq!(
        marker.history[0].error_kind.as_deref(),
        Some("no-subscribers")
    );
}

#[tokio::test]
async fn create_event_with_unknown_group_is_discarded_without_resolving_subscriptions() {
    let event_repo = InMemoryEventRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let group_repo = InMemoryGroupRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let queue_client = QueueClientFactory::create_test_client();

    let event = Event {
        id: EventId::new(),
        group_id: GroupId::new(),
        owner: EventOwner::Source(SourceId::new()),
        event_type: "push".to_string(),
        payload: bytes::Bytes::from_static(b"{}"),
        headers: HashMap::new(),
        created_at: Timestamp::now(),
    };

    let delivery_ids = create_event(
        event,
        &event_repo,
        &delivery_repo,
        &subscription_repo,
        &group_repo,
        &source_repo,
        queue_client.as_ref(),
    )
    .await
    .unwrap();

    assert_eq!(delivery_ids.len(), 1);
    let marker = delivery_repo.get(delivery_ids[0]).await.unwrap();
    assert_eq!(marker.status, crate::DeliveryStatus::Discarded);
    assert_eq!(marker.history[0].error_kind.as_deref(), Some("group not found"));
}

#[tokio::test]
async fn create_event_with_source_from_another_group_is_discarded() {
    let event_repo = InMemoryEventRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let group_repo = InMemoryGroupRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let queue_client = QueueClientFactory::create_test_client();

    let group = GroupId::new();
    let foreign_source = SourceId::new();
    group_repo.insert(incoming_group(group));
    source_repo.insert(crate::Source {
        id: foreign_source,
        group_id: GroupId::new(),
    });

    let event = Event {
        id: EventId::new(),
        group_id: group,
        owner: EventOwner::Source(foreign_source),
        event_type: "push".to_string(),
        payload: bytes::Bytes::from_static(b"{}"),
        headers: HashMap::new(),
        created_at: Timestamp::now(),
    };

    let delivery_ids = create_event(
        event,
        &event_repo,
        &delivery_repo,
        &subscription_repo,
        &group_repo,
        &source_repo,
        queue_client.as_ref(),
    )
    .await
    .unwrap();

    assert_eq!(delivery_ids.len(), 1);
    let marker = delivery_repo.get(delivery_ids[0]).await.unwrap();
    assert_eq!(marker.status, crate::DeliveryStatus::Discarded);
    assert_eq!(
        marker.history[0].error_kind.as_deref(),
        Some("source belongs to a different group")
    );
}
