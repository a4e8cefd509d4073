use super::*;
use crate::{
    ApplicationId, DeliveryTarget, EndpointSnapshot, EventId, GroupId, RateLimitConfig,
    RetryConfig, RetryStrategy, SourceId, SubscriptionId, Timestamp,
};
use std::collections::HashMap;

fn endpoint(url: &str) -> DeliveryTarget {
    DeliveryTarget::Endpoint(EndpointSnapshot {
        url: url.to_string(),
        secret: "shh".to_string(),
        signing_scheme: "sha256".to_string(),
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

fn subscription(
    group_id: GroupId,
    source_id: Option<SourceId>,
    application_id: Option<ApplicationId>,
    event_types: Vec<&str>,
) -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        group_id,
        application_id,
        device_id: None,
        source_id,
        target: endpoint("https://example.test/hook"),
        event_types: event_types.into_iter().map(String::from).collect(),
        retry_config: retry_config(),
        rate_limit: RateLimitConfig {
            count: 10,
            duration_secs: 60,
        },
    }
}

fn event(group_id: GroupId, owner: EventOwner, event_type: &str) -> Event {
    Event {
        id: EventId::new(),
        group_id,
        owner,
        event_type: event_type.to_string(),
        payload: bytes::Bytes::from_static(b"{}"),
        headers: HashMap::new(),
        created_at: Timestamp::now(),
    }
}

#[test]
fn matches_by_source_for_incoming_groups() {
    let group = GroupId::new();
    let source = SourceId::new();
    let other_source = SourceId::new();
    let sub = subscription(group, Some(source), None, vec![]);
    let other = subscription(group, Some(other_source), None, vec![]);

    let evt = event(group, EventOwner::Source(source), "push");
    let matches = match_subscriptions(&evt, &[sub.clone(), other]);

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, sub.id);
}

#[test]
fn matches_by_application_for_outgoing_groups() {
    let group = GroupId::new();
    let app = ApplicationId::new();
    let sub = subscription(group, None, Some(app), vec![]);

    let evt = event(group, EventOwner::Application(app), "order.created");
    let matches = match_subscriptions(&evt, &[sub.clone()]);

    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].id, sub.id);
}

#[test]
fn empty_filter_set_matches_every_event_type() {
    let group = GroupId::new();
    let source = SourceId::new();
    let sub = subscription(group, Some(source), None, vec![]);

    let evt = event(group, EventOwner::Source(source), "anything.at.all");
    assert_eq!(match_subscriptions(&evt, &[sub]).len(), 1);
}

#[test]
fn glob_filters_restrict_event_types() {
    let group = GroupId::new();
    let source = SourceId::new();
    let sub = subscription(group, Some(source), None, vec!["pull_request.*"]);

    let matching = event(group, EventOwner::Source(source), "pull_request.opened");
    let non_matching = event(group, EventOwner::Source(source), "issue.opened");

    assert_eq!(match_subscriptions(&matching, &[sub.clone()]).len(), 1);
    assert_eq!(match_subscriptions(&non_matching, &[sub]).len(), 0);
}

#[test]
fn subscriptions_outside_the_event_group_never_match() {
    let group = GroupId::new();
    let other_group = GroupId::new();
    let source = SourceId::new();
    let sub = subscription(other_group, Some(source), None, vec![]);

    let evt = event(group, EventOwner::Source(source), "push");
    assert_eq!(match_subscriptions(&evt, &[sub]).len(), 0);
}

#[test]
fn mismatched_owner_does_not_match_even_in_same_group() {
    let group = GroupId::new();
    let source = SourceId::new();
    let other_source = SourceId::new();
    let sub = subscription(group, Some(other_source), None, vec![]);

    let evt = event(group, EventOwner::Source(source), "push");
    assert_eq!(match_subscriptions(&evt, &[sub]).len(), 0);
}
