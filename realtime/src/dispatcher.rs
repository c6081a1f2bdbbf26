use crate::connection::{Connection, ConnectionRegistry};
use crate::message::ServerFrame;
use crate::queue::EnqueueOutcome;
use crate::stats::ManagerStats;
use events::{Event, EventSink};
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// Publisher-facing end of the dispatch queue.
///
/// `submit` is a non-blocking `try_send`: when the dispatcher falls behind and
/// the bounded queue is full, the event is shed (counted and logged) instead
/// of stalling the HTTP request that published it.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<Arc<Event>>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ManagerStats>,
}

impl EventSink for DispatchHandle {
    fn submit(&self, event: Arc<Event>) {
        // Nobody to deliver to.
        if self.registry.is_empty() {
            return;
        }

        match self.sender.try_send(event) {
            Ok(()) => self.stats.record_published(),
            Err(TrySendError::Full(event)) => {
                self.stats.record_shed();
                warn!(
                    "Dispatch queue full, shedding {} event for entity {}",
                    event.event_type(),
                    event.entity_id()
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!(
                    "Dispatcher stopped, dropping {} event for entity {}",
                    event.event_type(),
                    event.entity_id()
                );
            }
        }
    }
}

/// Consumes published events and fans each one out to the matching
/// connections' outbound queues.
pub struct Dispatcher {
    receiver: mpsc::Receiver<Arc<Event>>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ManagerStats>,
}

/// Create a connected handle/dispatcher pair around a bounded queue.
pub fn channel(
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ManagerStats>,
    capacity: usize,
) -> (DispatchHandle, Dispatcher) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        DispatchHandle {
            sender,
            registry: Arc::clone(&registry),
            stats: Arc::clone(&stats),
        },
        Dispatcher {
            receiver,
            registry,
            stats,
        },
    )
}

impl Dispatcher {
    /// Run until cancelled or every handle is dropped. Blocks only while the
    /// input queue is empty.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Event dispatcher started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(event) => {
                        dispatch(&self.registry, &self.stats, &event);
                    }
                    None => break,
                },
            }
        }
        info!("Event dispatcher stopped");
    }
}

/// Fan one event out to every open connection that wants it. Returns the
/// number of connections the event was enqueued to.
///
/// Per-connection FIFO holds because this is the only producer of event
/// frames and it processes events strictly in queue order.
pub fn dispatch(registry: &ConnectionRegistry, stats: &ManagerStats, event: &Event) -> usize {
    let frame = match ServerFrame::event(event).encode() {
        Ok(frame) => frame,
        Err(e) => {
            error!(
                "Failed to serialize {} event for entity {}: {e}",
                event.event_type(),
                event.entity_id()
            );
            return 0;
        }
    };

    let mut delivered = 0;
    for connection in registry.snapshot() {
        if !connection.wants(event) {
            continue;
        }

        match connection.enqueue(Arc::clone(&frame)) {
            EnqueueOutcome::Queued => delivered += 1,
            EnqueueOutcome::DroppedOldest { consecutive } => {
                delivered += 1;
                stats.record_dropped();
                if consecutive == 1 {
                    warn!(
                        "Outbound queue full for connection {} ({}), dropping oldest frames",
                        connection.id(),
                        connection.username()
                    );
                }
            }
            EnqueueOutcome::Overflowed { consecutive } => {
                stats.record_dropped();
                evict(registry, stats, &connection, consecutive);
            }
            // Closed between snapshot and enqueue.
            EnqueueOutcome::Closed => {}
        }
    }

    trace!(
        "Dispatched {} event for entity {} to {} connection(s)",
        event.event_type(),
        event.entity_id(),
        delivered
    );
    stats.record_deliveries(delivered as u64);
    delivered
}

fn evict(
    registry: &ConnectionRegistry,
    stats: &ManagerStats,
    connection: &Arc<Connection>,
    consecutive: usize,
) {
    warn!(
        "Evicting slow consumer {} ({}) after {} consecutive dropped frames",
        connection.id(),
        connection.username(),
        consecutive
    );
    stats.record_eviction();
    registry.unregister_connection(connection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, ConnectionState};
    use crate::identity::{Grant, Identity};
    use crate::subscription::SubscriptionScope;
    use events::{Action, Context, Payload, PermissionLevel, ScopeType};

    fn register(
        registry: &ConnectionRegistry,
        id: &str,
        project_id: &str,
        capacity: usize,
        max_drops: usize,
    ) -> Arc<Connection> {
        let connection = Arc::new(Connection::new(
            ConnectionId::from(id),
            Identity::new(
                id,
                vec![Grant::new(
                    ScopeType::Project,
                    project_id,
                    PermissionLevel::Read,
                )],
            ),
            capacity,
            max_drops,
        ));
        registry.register(Arc::clone(&connection));
        connection
    }

    fn ticket_created(project_id: &str, entity_id: &str) -> Event {
        Event::new(
            Action::Created,
            "ticket",
            entity_id,
            "alice",
            Payload::new(),
            Context::project(project_id, PermissionLevel::Read),
        )
    }

    #[test]
    fn event_reaches_only_matching_connections() {
        let registry = ConnectionRegistry::new();
        let stats = ManagerStats::new();
        let p1 = register(&registry, "c1", "P1", 8, 4);
        let p2 = register(&registry, "c2", "P2", 8, 4);
        registry.subscribe(p1.id(), vec![], vec![SubscriptionScope::project("P1")]);
        registry.subscribe(p2.id(), vec![], vec![SubscriptionScope::project("P2")]);

        let delivered = dispatch(&registry, &stats, &ticket_created("P1", "T1"));

        assert_eq!(delivered, 1);
        assert_eq!(p1.queue().len(), 1);
        assert!(p2.queue().is_empty());
    }

    #[test]
    fn overlapping_subscriptions_deliver_once() {
        let registry = ConnectionRegistry::new();
        let stats = ManagerStats::new();
        let conn = register(&registry, "c1", "P1", 8, 4);
        registry.subscribe(conn.id(), vec!["ticket.*".to_string()], vec![]);
        registry.subscribe(conn.id(), vec!["ticket.created".to_string()], vec![]);

        dispatch(&registry, &stats, &ticket_created("P1", "T1"));

        assert_eq!(conn.queue().len(), 1);
    }

    #[test]
    fn unsubscribed_connection_receives_nothing() {
        let registry = ConnectionRegistry::new();
        let stats = ManagerStats::new();
        let conn = register(&registry, "c1", "P1", 8, 4);

        assert_eq!(dispatch(&registry, &stats, &ticket_created("P1", "T1")), 0);
        assert!(conn.queue().is_empty());
    }

    #[test]
    fn flooding_a_stalled_connection_evicts_it() {
        let registry = ConnectionRegistry::new();
        let stats = ManagerStats::new();
        let stalled = register(&registry, "c1", "P1", 2, 3);
        let healthy = register(&registry, "c2", "P1", 64, 3);
        registry.subscribe(stalled.id(), vec![], vec![]);
        registry.subscribe(healthy.id(), vec![], vec![]);

        // 2 fit, then 3 consecutive drops reach the threshold.
        for n in 0..5 {
            dispatch(&registry, &stats, &ticket_created("P1", &format!("T{n}")));
            // The healthy consumer keeps up.
            healthy.queue().try_recv();
        }

        assert_eq!(stalled.state(), ConnectionState::Closed);
        assert!(!registry.contains(stalled.id()));
        assert!(registry.snapshot().iter().all(|c| c.id() != stalled.id()));
        assert!(healthy.is_open());
        assert_eq!(stats.evictions(), 1);

        // Later publishes no longer touch the evicted connection.
        dispatch(&registry, &stats, &ticket_created("P1", "T9"));
        assert!(stalled.queue().is_empty());
    }

    #[tokio::test]
    async fn full_dispatch_queue_sheds_instead_of_blocking() {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(ManagerStats::new());
        register(&registry, "c1", "P1", 8, 4);

        // Dispatcher never runs, so the queue of one fills immediately.
        let (handle, _dispatcher) = channel(Arc::clone(&registry), Arc::clone(&stats), 1);

        handle.submit(Arc::new(ticket_created("P1", "T1")));
        handle.submit(Arc::new(ticket_created("P1", "T2")));
        handle.submit(Arc::new(ticket_created("P1", "T3")));

        assert_eq!(stats.events_shed(), 2);
    }

    #[tokio::test]
    async fn submit_without_connections_is_a_no_op() {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(ManagerStats::new());
        let (handle, _dispatcher) = channel(Arc::clone(&registry), Arc::clone(&stats), 1);

        handle.submit(Arc::new(ticket_created("P1", "T1")));
        handle.submit(Arc::new(ticket_created("P1", "T2")));

        assert_eq!(stats.events_shed(), 0);
        assert_eq!(stats.snapshot(0).events_published, 0);
    }
}
