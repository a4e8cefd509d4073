//! Event-delivery state machine (§4.G).
//!
//! One `EventDeliver` task performs exactly one delivery attempt and then
//! either terminates (`Success`/`Discarded`/`Failure`) or re-enqueues itself
//! with a delayed visibility so the queue becomes the scheduler for the next
//! attempt. State transitions are persisted with a compare-and-swap on
//! `attempt_count` (§5): a rate-limit denial does not increment it, so a
//! throttled delivery is retried without burning down its attempt budget.

use crate::dispatcher::{DispatchOutcome, HttpDispatcher};
use crate::hub::{DeviceHub, PushOutcome};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::retry::RetryPolicy;
use crate::{
    AttemptRecord, DeliveryId, DeliveryStatus, DeliveryTarget, EventDeliveryRepository,
    EventRepository, RepositoryError, SubscriptionRepository, Timestamp,
};
use queue_runtime::{Message, QueueClient, QueueError};
use std::time::Instant;
use tracing::{info, warn};

/// Errors that can occur while processing one delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl DeliveryError {
    /// Whether the caller should retry the whole `EventDeliver` task.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Repository(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
        }
    }
}

/// Outcome of processing a single `EventDeliver` task invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The endpoint/device accepted the delivery.
    Success,
    /// Rate limited; re-enqueued without consuming an attempt.
    RateLimited,
    /// A transient failure; re-enqueued with backoff, attempt consumed.
    Retrying { next_attempt: u32 },
    /// Attempts exhausted or the endpoint rejected the payload permanently.
    Terminal { status: DeliveryStatus },
}

const RETRY_TASK_KIND: &str = "event.deliver";
const DELIVERY_QUEUE: &str = "event-deliveries";

/// Process one attempt at delivering `delivery_id`.
#[allow(clippy::too_many_arguments)]
pub async fn deliver_event(
    delivery_id: DeliveryId,
    delivery_repo: &dyn EventDeliveryRepository,
    subscription_repo: &dyn SubscriptionRepository,
    event_repo: &dyn EventRepository,
    dispatcher: &HttpDispatcher,
    rate_limiter: &RateLimiter,
    hub: &DeviceHub,
    queue_client: &dyn QueueClient,
) -> Result<DeliveryOutcome, DeliveryError> {
    let mut delivery = delivery_repo.get(delivery_id).await?;

    if delivery.status.is_terminal() {
        return Ok(DeliveryOutcome::Terminal {
            status: delivery.status,
        });
    }

    let subscriptions = subscription_repo
        .find_by_group(delivery.group_id)
        .await
        .unwrap_or_default();
    let subscription = subscriptions
        .into_iter()
        .find(|s| s.id == delivery.subscription_id);

    let Some(subscription) = subscription else {
        return finalize(
            delivery_repo,
            delivery,
            DeliveryStatus::Discarded,
            None,
            Some("subscription no longer exists".to_string()),
        )
        .await;
    };

    let rate_limit_key = delivery.subscription_id.to_string();
    match rate_limiter.allow(
        &rate_limit_key,
        subscription.rate_limit.count,
        subscription.rate_limit.duration_secs,
    ) {
        RateLimitDecision::Denied { retry_after } => {
            requeue(
                queue_client,
                delivery_id,
                chrono::Duration::milliseconds(retry_after.as_millis() as i64),
            )
            .await?;
            info!(delivery_id = %delivery_id, "delivery rate limited, re-enqueued without consuming attempt");
            return Ok(DeliveryOutcome::RateLimited);
        }
        RateLimitDecision::Permitted => {}
    }

    let event = event_repo.get(delivery.event_id).await?;

    let expected_attempt_count = delivery.attempt_count;
    let started = Instant::now();

    let outcome = match &delivery.target {
        DeliveryTarget::Endpoint(endpoint) => {
            let mut headers = endpoint.custom_headers.clone();
            headers.insert("X-Convoy-Event".to_string(), event.event_type.clone());

            match dispatcher
                .dispatch(
                    &endpoint.url,
                    &endpoint.secret,
                    &endpoint.signing_scheme,
                    &event.payload,
                    &headers,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.is_transient() => DispatchOutcome::Retry {
                    status: None,
                    retry_after: None,
                    reason: e.to_string(),
                },
                Err(e) => DispatchOutcome::Discard {
                    status: 0,
                    reason: e.to_string(),
                },
            }
        }
        DeliveryTarget::Device(device_id) => {
            match hub
                .push(
                    *device_id,
                    &delivery,
                    &event.event_type,
                    event.payload.clone(),
                    event.headers.clone(),
                )
                .await
            {
                PushOutcome::Ack => DispatchOutcome::Success { status: 200 },
                PushOutcome::Nack => DispatchOutcome::Discard {
                    status: 0,
                    reason: "device explicitly nacked the delivery".to_string(),
                },
                PushOutcome::Offline => DispatchOutcome::Retry {
                    status: None,
                    retry_after: None,
                    reason: "device offline".to_string(),
                },
                PushOutcome::Timeout => DispatchOutcome::Retry {
                    status: None,
                    retry_after: None,
                    reason: "device push timed out".to_string(),
                },
            }
        }
    };

    let latency = chrono::Duration::milliseconds(started.elapsed().as_millis() as i64);
    let retry_policy = RetryPolicy::new(subscription.retry_config.clone());

    delivery.attempt_count += 1;
    let attempt_record = AttemptRecord {
        timestamp: Timestamp::now(),
        response_code: None,
        response_body_prefix: String::new(),
        remote_ip: None,
        latency,
        error_kind: None,
    };

    match outcome {
        DispatchOutcome::Success { status } => {
            delivery.history.push(AttemptRecord {
                response_code: Some(status),
                ..attempt_record
            });
            finalize(
                delivery_repo,
                delivery,
                DeliveryStatus::Success,
                Some(expected_attempt_count),
                None,
            )
            .await
        }
        DispatchOutcome::Discard { status, reason } => {
            delivery.history.push(AttemptRecord {
                response_code: Some(status),
                error_kind: Some(reason),
                ..attempt_record
            });
            finalize(
                delivery_repo,
                delivery,
                DeliveryStatus::Discarded,
                Some(expected_attempt_count),
                None,
            )
            .await
        }
        DispatchOutcome::Retry {
            status,
            reason,
            retry_after,
        } => {
            delivery.history.push(AttemptRecord {
                response_code: status,
                error_kind: Some(reason),
                ..attempt_record
            });

            if !retry_policy.should_retry(delivery.attempt_count) {
                return finalize(
                    delivery_repo,
                    delivery,
                    DeliveryStatus::Failure,
                    Some(expected_attempt_count),
                    None,
                )
                .await;
            }

            let delay = retry_after
                .map(|d| chrono::Duration::milliseconds(d.as_millis() as i64))
                .unwrap_or_else(|| retry_policy.delay_for_attempt(delivery.attempt_count));

            delivery.status = DeliveryStatus::Retry;
            delivery.next_attempt_at = Some(Timestamp::now().add(delay));
            let next_attempt = delivery.attempt_count;

            delivery_repo
                .compare_and_update(expected_attempt_count, delivery)
                .await?;
            requeue(queue_client, delivery_id, delay).await?;

            warn!(delivery_id = %delivery_id, attempt = next_attempt, "delivery failed, retry scheduled");
            Ok(DeliveryOutcome::Retrying { next_attempt })
        }
    }
}

async fn finalize(
    delivery_repo: &dyn EventDeliveryRepository,
    mut delivery: crate::EventDelivery,
    status: DeliveryStatus,
    expected_attempt_count: Option<u32>,
    discard_reason: Option<String>,
) -> Result<DeliveryOutcome, DeliveryError> {
    if let Some(reason) = discard_reason {
        delivery.history.push(AttemptRecord {
            timestamp: Timestamp::now(),
            response_code: None,
            response_body_prefix: String::new(),
            remote_ip: None,
            latency: chrono::Duration::zero(),
            error_kind: Some(reason),
        });
    }
    delivery.status = status;
    delivery.next_attempt_at = None;

    match expected_attempt_count {
        Some(expected) => {
            delivery_repo
                .compare_and_update(expected, delivery)
                .await?;
        }
        None => {
            delivery_repo
                .compare_and_update(delivery.attempt_count, delivery)
                .await?;
        }
    }

    Ok(DeliveryOutcome::Terminal { status })
}

async fn requeue(
    queue_client: &dyn QueueClient,
    delivery_id: DeliveryId,
    delay: chrono::Duration,
) -> Result<(), QueueError> {
    let queue_name = queue_runtime::QueueName::new(DELIVERY_QUEUE.to_string())
        .expect("DELIVERY_QUEUE is a valid static queue name");
    let message = Message::new(RETRY_TASK_KIND, bytes::Bytes::from(delivery_id.to_string()))
        .with_uniqueness_key(delivery_id.to_string())
        .with_delay(delay);
    queue_client.send_message(&queue_name, message).await?;
    Ok(())
}

#[cfg(test)]
#[path = "delivery_tests.rs"]
mod tests;
