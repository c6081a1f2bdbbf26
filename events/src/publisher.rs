use crate::context::Context;
use crate::event::{Action, Event, Payload};
use log::*;
use std::sync::Arc;

/// Consumer of published events.
///
/// Implementations must return immediately: `submit` runs on the HTTP request
/// path of the handler that triggered the change. Anything slow (matching,
/// serialization, socket I/O) belongs behind a queue.
pub trait EventSink: Send + Sync {
    fn submit(&self, event: Arc<Event>);
}

/// Publishes events to registered sinks.
///
/// Best-effort: there is no return value and no error. A publisher with no
/// sinks (the feature is disabled) is a no-op, so callers never branch on
/// whether real-time delivery is turned on.
#[derive(Clone)]
pub struct EventPublisher {
    sinks: Arc<Vec<Arc<dyn EventSink>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            sinks: Arc::new(Vec::new()),
        }
    }

    /// A publisher that drops everything. Equivalent to `new()` with no sinks,
    /// named for call sites where the feature flag is off.
    pub fn disabled() -> Self {
        Self::new()
    }

    /// Attach a sink. Clones made before this call keep their old sink list;
    /// only the returned publisher forwards to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        let mut sinks = (*self.sinks).clone();
        sinks.push(sink);
        self.sinks = Arc::new(sinks);
        self
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Publish an already constructed event to every sink.
    pub fn publish(&self, event: Event) {
        if !self.is_enabled() {
            return;
        }

        trace!(
            "Publishing {} event for entity {} by {} ({})",
            event.event_type(),
            event.entity_id(),
            event.actor(),
            event.context()
        );

        let event = Arc::new(event);
        for sink in self.sinks.iter() {
            sink.submit(Arc::clone(&event));
        }
    }

    /// Called by CRUD handlers exactly once per successful mutation, after the
    /// database write commits.
    pub fn publish_entity_event(
        &self,
        action: impl Into<Action>,
        object_type: &str,
        entity_id: &str,
        actor: &str,
        payload: Payload,
        context: Context,
    ) {
        if !self.is_enabled() {
            return;
        }

        self.publish(Event::new(
            action.into(),
            object_type,
            entity_id,
            actor,
            payload,
            context,
        ));
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
