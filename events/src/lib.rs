//! Event model and publishing entry point for real-time entity notifications.
//!
//! This crate provides the narrow surface CRUD handlers depend on to announce
//! that an entity changed, decoupled from the transport that fans the change
//! out to connected clients.
//!
//! # Architecture
//!
//! - **Event**: immutable "entity changed" fact (action, object type, entity id,
//!   actor, payload, context, timestamp)
//! - **Context**: authorization scope plus the minimum permission level needed
//!   to receive the event
//! - **EventSink**: trait implemented by whatever consumes published events
//!   (the real-time dispatcher's queue)
//! - **EventPublisher**: hands events to registered sinks; never blocks and
//!   never fails
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Entity data is carried as a JSON object.

pub mod context;
pub mod event;
pub mod publisher;

pub use context::{Context, PermissionLevel, ScopeType};
pub use event::{Action, Event, Payload};
pub use publisher::{EventPublisher, EventSink};
