//! WebSocket notification core for real-time entity change events.
//!
//! Mutation handlers publish an `events::Event` after a successful write;
//! this crate fans the event out to every connected client that subscribed to
//! it and is allowed to see it.
//!
//! # Architecture
//!
//! - **Non-blocking publish**: `EventPublisher::publish` hands the event to a
//!   bounded dispatch queue with `try_send`. When the dispatcher falls behind,
//!   events are shed and counted; the request path never waits.
//! - **Single dispatcher**: one task consumes the dispatch queue in order, so
//!   every connection observes events in publication order.
//! - **Sharded registry**: connections live in `DashMap`s indexed by
//!   connection id and by username. The dispatcher scans a snapshot of open
//!   connections, taking shard locks only while cloning `Arc`s.
//! - **Bounded per-connection queues**: each connection owns an outbound queue
//!   with a drop-oldest policy. A connection that keeps dropping frames is
//!   evicted so one slow consumer cannot hold memory or delay others.
//! - **Identity snapshot**: permissions are resolved once at connect time and
//!   never refreshed; clients reconnect to pick up changes.
//!
//! # Connection lifecycle
//!
//! 1. The web layer authenticates the upgrade request and resolves an
//!    `Identity` (username plus grants).
//! 2. `Manager::connect` registers the connection and queues a `connected`
//!    frame.
//! 3. `Manager::run_session` spawns the writer and runs the reader until the
//!    peer closes, goes idle, fails a write, or is evicted.
//! 4. Every exit path unregisters the connection: subscriptions are dropped
//!    and the outbound queue discarded.
//!
//! # Example: publishing from a handler
//!
//! ```rust,ignore
//! use events::{Action, Context, PermissionLevel};
//!
//! app_state.publisher.publish_entity_event(
//!     Action::Created,
//!     "ticket",
//!     &ticket.id,
//!     &user.username,
//!     payload,
//!     Context::project(&ticket.project_id, PermissionLevel::Read),
//! );
//! ```
//!
//! # Modules
//!
//! - `connection`: connection state and the dual-index `ConnectionRegistry`
//! - `dispatcher`: fan-out of published events with overload shedding
//! - `manager`: admission, lifecycle and the publisher handed to handlers
//! - `message`: inbound control messages and outbound frame encoding
//! - `protocol`: subscribe/unsubscribe/ping handling
//! - `queue`: bounded drop-oldest outbound queue
//! - `session`: reader and writer loops
//! - `subscription`: subscription filters and permission gating

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod manager;
pub mod message;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod stats;
pub mod subscription;

pub use config::ManagerConfig;
pub use connection::{Connection, ConnectionId, ConnectionRegistry, ConnectionState};
pub use error::{Error, ErrorKind};
pub use identity::{Grant, Identity};
pub use manager::Manager;
pub use stats::StatsSnapshot;
