//! Subscription matching against events (§4.C).
//!
//! `Match(event) -> [Subscription]`: Incoming groups scope subscriptions by
//! `source_id`, Outgoing groups scope by `application_id`. An empty event-type
//! filter set matches every event type; a non-empty set is a list of glob
//! patterns (`*` wildcard) compiled to anchored regexes.

use crate::{Event, EventOwner, Subscription};
use regex::Regex;

/// Compile a glob pattern (`*` as the only wildcard) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut escaped = String::with_capacity(pattern.len() + 2);
    escaped.push('^');
    for part in pattern.split('*') {
        if !escaped.ends_with('^') {
            escaped.push_str(".*");
        }
        escaped.push_str(&regex::escape(part));
    }
    escaped.push('$');
    Regex::new(&escaped).ok()
}

fn event_type_matches(filters: &[String], event_type: &str) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters.iter().any(|pattern| {
        glob_to_regex(pattern)
            .map(|re| re.is_match(event_type))
            .unwrap_or(false)
    })
}

fn owner_matches(subscription: &Subscription, owner: &EventOwner) -> bool {
    match owner {
        EventOwner::Source(source_id) => subscription
            .source_id
            .as_ref()
            .map(|id| id == source_id)
            .unwrap_or(false),
        EventOwner::Application(application_id) => subscription
            .application_id
            .as_ref()
            .map(|id| id == application_id)
            .unwrap_or(false),
    }
}

/// Return the subscriptions from `candidates` that match `event`.
///
/// `candidates` should already be scoped to the event's group (callers fetch
/// it from [`crate::SubscriptionRepository::find_by_group`]); this function
/// only applies the source/application scoping and event-type filtering.
pub fn match_subscriptions<'a>(
    event: &Event,
    candidates: &'a [Subscription],
) -> Vec<&'a Subscription> {
    candidates
        .iter()
        .filter(|sub| sub.group_id == event.group_id)
        .filter(|sub| owner_matches(sub, &event.owner))
        .filter(|sub| event_type_matches(&sub.event_types, &event.event_type))
        .collect()
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
