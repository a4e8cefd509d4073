//! Retention sweeps over terminal events/deliveries (§4.H).
//!
//! Periodically walks each group's terminal-status deliveries and events
//! older than its configured retention horizon and purges them. Paging is
//! resumable: each page is fetched and deleted independently, so a crash
//! mid-sweep only leaves already-processed pages purged, not a half-written
//! transaction.

use crate::{EventDeliveryRepository, EventRepository, GroupRepository, RepositoryError, Timestamp};
use tracing::info;

/// Errors that can occur while running a retention sweep.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Number of deliveries purged per group, per page, to bound memory use and
/// keep individual sweep iterations fast.
const PAGE_SIZE: usize = 200;

/// Purge terminal-status deliveries and their events for `group_id` older
/// than the group's configured retention horizon. Returns the total number
/// of rows purged (deliveries plus events).
pub async fn retention_sweep(
    group_id: crate::GroupId,
    group_repo: &dyn GroupRepository,
    delivery_repo: &dyn EventDeliveryRepository,
    event_repo: &dyn EventRepository,
) -> Result<usize, RetentionError> {
    let group = group_repo.get(group_id).await?;
    let cutoff = Timestamp::now().add(-group.retention_horizon);

    let mut deliveries_purged = 0usize;
    loop {
        let page = delivery_repo
            .find_by_group_before(group_id, cutoff, PAGE_SIZE)
            .await?;

        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        for delivery in page {
            delivery_repo.delete(delivery.id).await?;
        }
        deliveries_purged += page_len;

        if page_len < PAGE_SIZE {
            break;
        }
    }

    let mut events_purged = 0usize;
    loop {
        let page = event_repo
            .find_by_group_before(group_id, cutoff, PAGE_SIZE)
            .await?;

        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        for event in page {
            event_repo.delete(event.id).await?;
        }
        events_purged += page_len;

        if page_len < PAGE_SIZE {
            break;
        }
    }

    let purged = deliveries_purged + events_purged;
    if purged > 0 {
        info!(
            group_id = %group_id,
            deliveries_purged,
            events_purged,
            "retention sweep purged expired events and deliveries"
        );
    }

    Ok(purged)
}

#[cfg(test)]
#[path = "retention_tests.rs"]
mod tests;
