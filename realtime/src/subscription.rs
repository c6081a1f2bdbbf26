use crate::identity::Identity;
use events::{Event, ScopeType};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique subscription identifier, echoed back in subscribe acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A scope a client asks to watch. Carries no permission level: whether the
/// client may see events there is decided by its identity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionScope {
    #[serde(rename = "scopeType")]
    pub scope_type: ScopeType,
    #[serde(rename = "scopeID", default)]
    pub scope_id: String,
}

impl SubscriptionScope {
    pub fn new(scope_type: ScopeType, scope_id: impl Into<String>) -> Self {
        Self {
            scope_type,
            scope_id: scope_id.into(),
        }
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self::new(ScopeType::Project, project_id)
    }
}

/// One registered interest of a connection.
///
/// An empty `event_types` filter matches every type; an empty `scopes` list
/// covers every scope in the connection's identity snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub event_types: Vec<String>,
    pub scopes: Vec<SubscriptionScope>,
}

impl Subscription {
    pub fn new(event_types: Vec<String>, scopes: Vec<SubscriptionScope>) -> Self {
        Self {
            id: SubscriptionId::next(),
            event_types,
            scopes,
        }
    }

    pub fn matches_type(&self, event: &Event) -> bool {
        self.event_types.is_empty()
            || self
                .event_types
                .iter()
                .any(|filter| type_filter_matches(filter, event))
    }

    /// Whether this subscription covers the event's scope. Global events are
    /// not tied to a scope and are covered by every subscription.
    pub fn covers_scope(&self, event: &Event) -> bool {
        let context = event.context();
        context.is_global()
            || self.scopes.is_empty()
            || self.scopes.iter().any(|scope| {
                scope.scope_type == context.scope_type && scope.scope_id == context.scope_id
            })
    }

    /// Full match for one (connection, subscription) pair: type filter, scope
    /// and permission gating against the connection's identity snapshot.
    pub fn matches(&self, identity: &Identity, event: &Event) -> bool {
        self.matches_type(event) && self.covers_scope(event) && is_authorized(identity, event)
    }
}

/// Type filter entries accepted from clients:
/// `*`, `ticket`, `ticket.*` and exact `ticket.created`.
pub fn type_filter_matches(filter: &str, event: &Event) -> bool {
    if filter == "*" || filter == event.event_type() {
        return true;
    }

    let object_type = filter.strip_suffix(".*").unwrap_or(filter);
    object_type == event.object_type()
}

/// Permission gate. Exact scope match only, no hierarchy traversal; global
/// events require some grant at or above the required level.
pub fn is_authorized(identity: &Identity, event: &Event) -> bool {
    let context = event.context();
    let held = if context.is_global() {
        identity.highest_level()
    } else {
        identity.level_at(context.scope_type, &context.scope_id)
    };

    held.is_some_and(|level| level.satisfies(context.required_permission))
}
