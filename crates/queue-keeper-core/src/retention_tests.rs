use super::*;
use crate::repositories::{InMemoryEventDeliveryRepository, InMemoryEventRepository, InMemoryGroupRepository};
use crate::{
    AttemptRecord, DeliveryStatus, DeliveryTarget, EndpointSnapshot, Event, EventDelivery,
    EventId, EventOwner, Group, GroupType, SubscriptionId,
};
use std::collections::HashMap;

fn terminal_delivery(group_id: crate::GroupId, age: chrono::Duration) -> EventDelivery {
    let mut delivery = EventDelivery::new_scheduled(
        EventId::new(),
        SubscriptionId::new(),
        group_id,
        DeliveryTarget::Endpoint(EndpointSnapshot {
            url: "https://example.test".to_string(),
            secret: "s".to_string(),
            signing_scheme: "sha256".to_string(),
            custom_headers: HashMap::new(),
        }),
    );
    delivery.status = DeliveryStatus::Success;
    delivery.history.push(AttemptRecord {
        timestamp: Timestamp::now().add(-age),
        response_code: Some(200),
        response_body_prefix: String::new(),
        remote_ip: None,
        latency: chrono::Duration::zero(),
        error_kind: None,
    });
    delivery
}

fn event(group_id: crate::GroupId, age: chrono::Duration) -> Event {
    Event {
        id: EventId::new(),
        group_id,
        owner: EventOwner::Application(crate::ApplicationId::new()),
        event_type: "charge.success".to_string(),
        payload: bytes::Bytes::from_static(b"{}"),
        headers: HashMap::new(),
        created_at: Timestamp::now().add(-age),
    }
}

#[tokio::test]
async fn sweep_purges_deliveries_older_than_the_horizon() {
    let group_repo = InMemoryGroupRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let event_repo = InMemoryEventRepository::default();

    let group = Group {
        id: crate::GroupId::new(),
        group_type: GroupType::Incoming,
        retention_horizon: chrono::Duration::days(7),
        rate_limit_count: 100,
        rate_limit_period: chrono::Duration::seconds(60),
    };
    group_repo.insert(group.clone());

    let old = terminal_delivery(group.id, chrono::Duration::days(30));
    let recent = terminal_delivery(group.id, chrono::Duration::days(1));
    let old_id = old.id;
    let recent_id = recent.id;
    delivery_repo.create(old).await.unwrap();
    delivery_repo.create(recent).await.unwrap();

    let purged = retention_sweep(group.id, &group_repo, &delivery_repo, &event_repo)
        .await
        .unwrap();

    assert_eq!(purged, 1);
    assert!(delivery_repo.get(old_id).await.is_err());
    assert!(delivery_repo.get(recent_id).await.is_ok());
}

#[tokio::test]
async fn sweep_purges_events_older_than_the_horizon() {
    let group_repo = InMemoryGroupRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let event_repo = InMemoryEventRepository::default();

    let group = Group {
        id: crate::GroupId::new(),
        group_type: GroupType::Outgoing,
        retention_horizon: chrono::Duration::days(7),
        rate_limit_count: 100,
        rate_limit_period: chrono::Duration::seconds(60),
    };
    group_repo.insert(group.clone());

    let old = event(group.id, chrono::Duration::days(30));
    let recent = event(group.id, chrono::Duration::days(1));
    let old_id = old.id;
    let recent_id = recent.id;
    event_repo.create(old).await.unwrap();
    event_repo.create(recent).await.unwrap();

    let purged = retention_sweep(group.id, &group_repo, &delivery_repo, &event_repo)
        .await
        .unwrap();

    assert_eq!(purged, 1);
    assert!(event_repo.get(old_id).await.is_err());
    assert!(event_repo.get(recent_id).await.is_ok());
}

#[tokio::test]
async fn sweep_is_a_no_op_when_nothing_is_past_the_horizon() {
    let group_repo = InMemoryGroupRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let event_repo = InMemoryEventRepository::default();

    let group = Group {
        id: crate::GroupId::new(),
        group_type: GroupType::Outgoing,
        retention_horizon: chrono::Duration::days(30),
        rate_limit_count: 100,
        rate_limit_period: chrono::Duration::seconds(60),
    };
    group_repo.insert(group.clone());

    let recent = terminal_delivery(group.id, chrono::Duration::days(1));
    delivery_repo.create(recent).await.unwrap();
    let recent_event = event(group.id, chrono::Duration::days(1));
    event_repo.create(recent_event).await.unwrap();

    let purged = retention_sweep(group.id, &group_repo, &delivery_repo, &event_repo)
        .await
        .unwrap();

    assert_eq!(purged, 0);
}

#[tokio::test]
async fn sweep_on_unknown_group_propagates_not_found() {
    let group_repo = InMemoryGroupRepository::default();
    let delivery_repo = InMemoryEventDeliveryRepository::default();
    let event_repo = InMemoryEventRepository::default();

    let err = retention_sweep(crate::GroupId::new(), &group_repo, &delivery_repo, &event_repo)
        .await
        .unwrap_err();
    assert!(matches!(err, RetentionError::Repository(RepositoryError::NotFound { .. })));
}
