use super::*;
use crate::repositories::{
    InMemoryDeviceRepository, InMemorySourceRepository, InMemorySubscriptionRepository,
};
use crate::{ApplicationId, DeviceStatus, GroupId, GroupType};

fn group(group_type: GroupType) -> Group {
    Group {
        id: GroupId::new(),
        group_type,
        retention_horizon: chrono::Duration::days(30),
        rate_limit_count: 100,
        rate_limit_period: chrono::Duration::seconds(60),
    }
}

#[tokio::test]
async fn login_creates_new_device_when_no_device_id_given() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();

    let device = login(
        &group,
        app,
        LoginRequest {
            host_name: "hostname_1".to_string(),
            device_id: None,
        },
        &device_repo,
    )
    .await
    .unwrap();

    assert_eq!(device.group_id, group.id);
    assert_eq!(device.application_id, app);
    assert_eq!(device.status, DeviceStatus::Offline);
    assert!(device_repo.get(device.id).await.is_ok());
}

#[tokio::test]
async fn login_resets_an_online_device_to_offline() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();

    let existing = Device {
        id: DeviceId::new(),
        group_id: group.id,
        application_id: app,
        host_name: "hostname_1".to_string(),
        status: DeviceStatus::Online,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(existing.clone());

    let device = login(
        &group,
        app,
        LoginRequest {
            host_name: "hostname_1".to_string(),
            device_id: Some(existing.id),
        },
        &device_repo,
    )
    .await
    .unwrap();

    assert_eq!(device.status, DeviceStatus::Offline);
    assert_eq!(device_repo.get(existing.id).await.unwrap().status, DeviceStatus::Offline);
}

#[tokio::test]
async fn login_rejects_a_device_from_another_group() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();

    let existing = Device {
        id: DeviceId::new(),
        group_id: GroupId::new(),
        application_id: app,
        host_name: "hostname_1".to_string(),
        status: DeviceStatus::Online,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(existing.clone());

    let err = login(
        &group,
        app,
        LoginRequest {
            host_name: "hostname_1".to_string(),
            device_id: Some(existing.id),
        },
        &device_repo,
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::WrongGroup);
    assert_eq!(err.http_status(), 401);
}

#[tokio::test]
async fn login_rejects_a_device_from_another_application() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();

    let existing = Device {
        id: DeviceId::new(),
        group_id: group.id,
        application_id: ApplicationId::new(),
        host_name: "hostname_1".to_string(),
        status: DeviceStatus::Online,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(existing.clone());

    let err = login(
        &group,
        app,
        LoginRequest {
            host_name: "hostname_1".to_string(),
            device_id: Some(existing.id),
        },
        &device_repo,
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::WrongApplication);
}

#[tokio::test]
async fn listen_updates_an_existing_subscriptions_event_types() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let hub = DeviceHub::new();

    let device = Device {
        id: DeviceId::new(),
        group_id: group.id,
        application_id: app,
        host_name: String::new(),
        status: DeviceStatus::Offline,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(device.clone());

    let subscription = Subscription {
        id: SubscriptionId::new(),
        group_id: group.id,
        application_id: Some(app),
        device_id: Some(device.id),
        source_id: None,
        target: DeliveryTarget::Device(device.id),
        event_types: vec!["old.event".to_string()],
        retry_config: crate::RetryConfig {
            strategy: crate::RetryStrategy::Linear,
            max_attempts: 3,
            base_interval: chrono::Duration::seconds(1),
            cap: chrono::Duration::seconds(10),
        },
        rate_limit: crate::RateLimitConfig {
            count: 10,
            duration_secs: 60,
        },
    };
    subscription_repo.create(subscription.clone()).await.unwrap();

    listen(
        &group,
        app,
        ListenRequest {
            device_id: device.id,
            source_id: None,
            event_types: vec!["charge.success".to_string()],
        },
        &hub,
        &device_repo,
        &source_repo,
        &subscription_repo,
    )
    .await
    .unwrap();

    let updated = subscription_repo.find_by_device(device.id).await.unwrap();
    assert_eq!(updated.event_types, vec!["charge.success".to_string()]);
    assert!(hub.is_online(device.id).await);
}

#[tokio::test]
async fn listen_creates_a_subscription_when_none_exists() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let hub = DeviceHub::new();

    let device = Device {
        id: DeviceId::new(),
        group_id: group.id,
        application_id: app,
        host_name: String::new(),
        status: DeviceStatus::Offline,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(device.clone());

    listen(
        &group,
        app,
        ListenRequest {
            device_id: device.id,
            source_id: None,
            event_types: vec!["charge.success".to_string()],
        },
        &hub,
        &device_repo,
        &source_repo,
        &subscription_repo,
    )
    .await
    .unwrap();

    let created = subscription_repo.find_by_device(device.id).await.unwrap();
    assert_eq!(created.event_types, vec!["charge.success".to_string()]);
}

#[tokio::test]
async fn listen_rejects_a_device_from_another_group() {
    let group = group(GroupType::Outgoing);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let hub = DeviceHub::new();

    let device = Device {
        id: DeviceId::new(),
        group_id: GroupId::new(),
        application_id: app,
        host_name: String::new(),
        status: DeviceStatus::Offline,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(device.clone());

    let err = listen(
        &group,
        app,
        ListenRequest {
            device_id: device.id,
            source_id: None,
            event_types: vec![],
        },
        &hub,
        &device_repo,
        &source_repo,
        &subscription_repo,
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::WrongGroup);
}

#[tokio::test]
async fn listen_rejects_a_source_from_another_group_on_incoming_groups() {
    let group = group(GroupType::Incoming);
    let app = ApplicationId::new();
    let device_repo = InMemoryDeviceRepository::default();
    let source_repo = InMemorySourceRepository::default();
    let subscription_repo = InMemorySubscriptionRepository::default();
    let hub = DeviceHub::new();

    let device = Device {
        id: DeviceId::new(),
        group_id: group.id,
        application_id: app,
        host_name: String::new(),
        status: DeviceStatus::Offline,
        last_seen: crate::Timestamp::now(),
    };
    device_repo.insert(device.clone());

    let source = Source {
        id: crate::SourceId::new(),
        group_id: GroupId::new(),
    };
    source_repo.insert(source.clone());

    let err = listen(
        &group,
        app,
        ListenRequest {
            device_id: device.id,
            source_id: Some(source.id),
            event_types: vec!["charge.success".to_string()],
        },
        &hub,
        &device_repo,
        &source_repo,
        &subscription_repo,
    )
    .await
    .unwrap_err();

    assert_eq!(err, HubError::WrongSource);
    assert_eq!(err.http_status(), 401);
    assert_eq!(err.message(), "this device cannot access this source");
}

#[tokio::test]
async fn hub_push_to_an_unregistered_device_reports_offline() {
    let hub = DeviceHub::new();
    let delivery = EventDelivery::new_scheduled(
        crate::EventId::new(),
        SubscriptionId::new(),
        GroupId::new(),
        DeliveryTarget::Device(DeviceId::new()),
    );

    let outcome = hub
        .push(
            DeviceId::new(),
            &delivery,
            "charge.success",
            bytes::Bytes::new(),
            Default::default(),
        )
        .await;

    assert_eq!(outcome, PushOutcome::Offline);
}

#[tokio::test]
async fn hub_push_waits_for_the_devices_ack_frame() {
    let hub = DeviceHub::new();
    let device_id = DeviceId::new();
    let mut receiver = hub.register_online(device_id).await;

    let delivery = EventDelivery::new_scheduled(
        crate::EventId::new(),
        SubscriptionId::new(),
        GroupId::new(),
        DeliveryTarget::Device(device_id),
    );
    let delivery_id = delivery.id;

    let push = hub.push(
        device_id,
        &delivery,
        "charge.success",
        bytes::Bytes::new(),
        Default::default(),
    );

    let responder = async {
        let command = receiver.recv().await.unwrap();
        assert_eq!(command.delivery_id, delivery_id);
        hub.ack(delivery_id).await;
    };

    let (outcome, ()) = tokio::join!(push, responder);
    assert_eq!(outcome, PushOutcome::Ack);
}

#[tokio::test]
async fn hub_push_reports_nack_from_the_devices_nack_frame() {
    let hub = DeviceHub::new();
    let device_id = DeviceId::new();
    let mut receiver = hub.register_online(device_id).await;

    let delivery = EventDelivery::new_scheduled(
        crate::EventId::new(),
        SubscriptionId::new(),
        GroupId::new(),
        DeliveryTarget::Device(device_id),
    );
    let delivery_id = delivery.id;

    let push = hub.push(
        device_id,
        &delivery,
        "charge.success",
        bytes::Bytes::new(),
        Default::default(),
    );

    let responder = async {
        receiver.recv().await.unwrap();
        hub.nack(delivery_id, "device rejected payload".to_string()).await;
    };

    let (outcome, ()) = tokio::join!(push, responder);
    assert_eq!(outcome, PushOutcome::Nack);
}

#[tokio::test]
async fn hub_push_times_out_when_the_device_never_responds() {
    let hub = DeviceHub::with_ack_timeout(std::time::Duration::from_millis(20));
    let device_id = DeviceId::new();
    let _receiver = hub.register_online(device_id).await;

    let delivery = EventDelivery::new_scheduled(
        crate::EventId::new(),
        SubscriptionId::new(),
        GroupId::new(),
        DeliveryTarget::Device(device_id),
    );

    let outcome = hub
        .push(
            device_id,
            &delivery,
            "charge.success",
            bytes::Bytes::new(),
            Default::default(),
        )
        .await;

    assert_eq!(outcome, PushOutcome::Timeout);
}

#[tokio::test]
async fn registering_online_twice_leaves_a_single_presence_entry() {
    let hub = DeviceHub::new();
    let device_id = DeviceId::new();

    let _first = hub.register_online(device_id).await;
    assert!(hub.is_online(device_id).await);

    let _second = hub.register_online(device_id).await;
    assert!(hub.is_online(device_id).await);

    hub.disconnect(device_id).await;
    assert!(!hub.is_online(device_id).await);
}
