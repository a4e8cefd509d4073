//! Tests for the queue-keeper-core domain model.

use super::*;

#[test]
fn event_id_generation_produces_distinct_sortable_ids() {
    let id1 = EventId::new();
    let id2 = EventId::new();

    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[test]
fn id_round_trips_through_display_and_from_str() {
    let id = DeliveryId::new();
    let parsed: DeliveryId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn id_from_str_rejects_non_ulid_input() {
    let result: Result<EventId, _> = "not-a-ulid".parse();
    assert!(matches!(result, Err(ParseError::InvalidFormat { .. })));
}

#[test]
fn correlation_id_round_trips_through_display_and_from_str() {
    let id = CorrelationId::new();
    let parsed: CorrelationId = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn timestamp_add_supports_negative_deltas() {
    let now = Timestamp::now();
    let earlier = now.add(-chrono::Duration::days(7));
    assert!(earlier.as_datetime() < now.as_datetime());
}

#[test]
fn timestamp_round_trips_through_rfc3339() {
    let now = Timestamp::now();
    let parsed = Timestamp::from_rfc3339(&now.to_rfc3339()).unwrap();
    assert_eq!(now.to_rfc3339(), parsed.to_rfc3339());
}

#[test]
fn delivery_status_terminal_states_are_exactly_success_failure_discarded() {
    assert!(DeliveryStatus::Success.is_terminal());
    assert!(DeliveryStatus::Failure.is_terminal());
    assert!(DeliveryStatus::Discarded.is_terminal());
    assert!(!DeliveryStatus::Scheduled.is_terminal());
    assert!(!DeliveryStatus::Processing.is_terminal());
    assert!(!DeliveryStatus::Retry.is_terminal());
}

#[test]
fn new_scheduled_delivery_starts_with_zero_attempts_and_no_history() {
    let delivery = EventDelivery::new_scheduled(
        EventId::new(),
        SubscriptionId::new(),
        GroupId::new(),
        DeliveryTarget::Device(DeviceId::new()),
    );

    assert_eq!(delivery.status, DeliveryStatus::Scheduled);
    assert_eq!(delivery.attempt_count, 0);
    assert!(delivery.next_attempt_at.is_none());
    assert!(delivery.history.is_empty());
}

#[test]
fn environment_from_str_accepts_common_aliases() {
    assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
    assert_eq!("Development".parse::<Environment>().unwrap(), Environment::Development);
    assert!("unknown".parse::<Environment>().is_err());
}

#[test]
fn log_level_orders_from_error_to_trace() {
    assert!(LogLevel::Error < LogLevel::Warn);
    assert!(LogLevel::Debug < LogLevel::Trace);
    assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
}

#[test]
fn queue_keeper_error_transience_matches_error_category() {
    let external = QueueKeeperError::ExternalService {
        service: "dispatch".to_string(),
        message: "timed out".to_string(),
    };
    assert!(external.is_transient());
    assert_eq!(external.error_category(), ErrorCategory::Transient);

    let validation: QueueKeeperError = ValidationError::Required {
        field: "event_type".to_string(),
    }
    .into();
    assert!(!validation.is_transient());
    assert_eq!(validation.error_category(), ErrorCategory::Permanent);
}
