use crate::config::ManagerConfig;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::dispatcher::{self, DispatchHandle, Dispatcher};
use crate::error::{Error, ErrorKind, LifecycleErrorKind, RegistrationErrorKind};
use crate::identity::Identity;
use crate::message::ServerFrame;
use crate::session::{self, SessionTimeouts};
use crate::stats::{ManagerStats, StatsSnapshot};
use axum::extract::ws::WebSocket;
use events::EventPublisher;
use futures::StreamExt;
use log::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Entry point of the notification core. Owns the connection registry and the
/// dispatcher, admits connections and hands out the publisher that mutation
/// handlers use.
pub struct Manager {
    config: ManagerConfig,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ManagerStats>,
    dispatch: DispatchHandle,
    dispatcher: Mutex<Option<Dispatcher>>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(ManagerStats::new());
        let (dispatch, dispatcher) = dispatcher::channel(
            Arc::clone(&registry),
            Arc::clone(&stats),
            config.dispatch_queue_capacity,
        );

        Self {
            config,
            registry,
            stats,
            dispatch,
            dispatcher: Mutex::new(Some(dispatcher)),
            dispatcher_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the dispatcher. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), Error> {
        let dispatcher = self
            .dispatcher
            .lock()
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Lifecycle(LifecycleErrorKind::AlreadyRunning)))?;

        let task = tokio::spawn(dispatcher.run(self.shutdown.child_token()));
        *self.dispatcher_task.lock() = Some(task);
        self.running.store(true, Ordering::Release);

        info!(
            "Event manager started (max clients {}, queue capacity {})",
            self.config.max_clients, self.config.outbound_queue_capacity
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Publisher for mutation handlers. A no-op publisher when the feature is
    /// disabled, so call sites never need to check.
    pub fn publisher(&self) -> EventPublisher {
        if !self.config.enabled {
            return EventPublisher::disabled();
        }
        EventPublisher::new().with_sink(Arc::new(self.dispatch.clone()))
    }

    /// Cheap pre-upgrade check so a full server can reject with an HTTP error
    /// instead of accepting and immediately closing the socket.
    pub fn can_accept(&self) -> Result<(), Error> {
        if self.shutdown.is_cancelled() {
            return Err(Error::registration(RegistrationErrorKind::ShuttingDown));
        }
        if self.registry.len() >= self.config.max_clients {
            return Err(Error::registration(RegistrationErrorKind::CapacityReached));
        }
        Ok(())
    }

    /// Register a connection for an already authenticated identity and queue
    /// its `connected` frame.
    pub fn connect(&self, identity: Identity) -> Result<Arc<Connection>, Error> {
        self.can_accept()?;

        let connection = Arc::new(Connection::new(
            ConnectionId::new(),
            identity,
            self.config.outbound_queue_capacity,
            self.config.max_consecutive_drops,
        ));
        self.registry.register(Arc::clone(&connection));
        self.stats.record_connection();

        let connected = ServerFrame::Connected {
            connection_id: connection.id().as_str(),
            username: connection.username(),
            timestamp: connection.connected_at().timestamp(),
        };
        match connected.encode() {
            Ok(frame) => {
                connection.enqueue(frame);
            }
            Err(e) => error!("Failed to serialize connected frame: {e}"),
        }

        info!(
            "Registered connection {} for {} ({} active)",
            connection.id(),
            connection.username(),
            self.registry.len()
        );
        Ok(connection)
    }

    /// Drive an upgraded socket until the session ends.
    pub async fn run_session(&self, connection: Arc<Connection>, socket: WebSocket) {
        let (sink, stream) = socket.split();
        session::run(
            connection,
            Arc::clone(&self.registry),
            sink,
            stream,
            self.session_timeouts(),
        )
        .await;
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            idle: self.config.idle_timeout,
            ping_period: self.config.ping_period,
            write: self.config.write_timeout,
        }
    }

    /// Stop delivering to a connection and let its writer flush what is queued.
    pub fn close_connection(&self, connection_id: &ConnectionId) -> bool {
        match self.registry.get(connection_id) {
            Some(connection) => connection.begin_draining(),
            None => false,
        }
    }

    /// Close every connection of a user, e.g. after their permissions changed.
    pub fn disconnect_user(&self, username: &str) -> usize {
        let ids = self.registry.connections_for_user(username);
        for id in &ids {
            self.registry.unregister(id);
        }
        if !ids.is_empty() {
            info!("Disconnected {} connection(s) for {username}", ids.len());
        }
        ids.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.registry.len())
    }

    /// Stop the dispatcher, drain every connection for up to the grace period,
    /// then force-close whatever is left. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(
            "Shutting down event manager with {} connection(s)",
            self.registry.len()
        );
        self.shutdown.cancel();

        for connection in self.registry.all() {
            connection.begin_draining();
        }

        let deadline = tokio::time::Instant::now() + self.config.close_grace_period;
        while !self.registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let remaining = self.registry.all();
        if !remaining.is_empty() {
            warn!(
                "Force-closing {} connection(s) after grace period",
                remaining.len()
            );
        }
        for connection in remaining {
            self.registry.unregister_connection(&connection);
        }

        let task = self.dispatcher_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Dispatcher task failed: {e}");
            }
        }
        self.running.store(false, Ordering::Release);
        info!("Event manager stopped");
    }
}
