use crate::connection::{Connection, ConnectionRegistry};
use crate::error::{Error, ProtocolErrorKind};
use crate::message::{AckData, ClientMessage, ServerFrame, SubscribeRequest, UnsubscribeRequest};
use crate::queue::Frame;
use events::ScopeType;
use log::*;

/// Handle one inbound text frame and build the reply for the sender.
///
/// Protocol errors never close the connection: they become an error frame
/// addressed to this client only. Returns `None` only if the reply could not
/// be serialized.
pub fn handle_text(
    registry: &ConnectionRegistry,
    connection: &Connection,
    text: &str,
) -> Option<Frame> {
    let reply = ClientMessage::parse(text)
        .and_then(|message| handle_message(registry, connection, message));

    let encoded = match reply {
        Ok(frame) => frame.encode(),
        Err(e) => {
            debug!(
                "Rejected frame from connection {} ({}): {e}",
                connection.id(),
                connection.username()
            );
            ServerFrame::error(&e).encode()
        }
    };

    match encoded {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!(
                "Failed to serialize reply for connection {}: {e}",
                connection.id()
            );
            None
        }
    }
}

/// Error frame for an inbound frame kind the protocol does not use.
pub fn unsupported_frame() -> Option<Frame> {
    ServerFrame::error(&Error::protocol(ProtocolErrorKind::UnsupportedFrame))
        .encode()
        .ok()
}

fn handle_message(
    registry: &ConnectionRegistry,
    connection: &Connection,
    message: ClientMessage,
) -> Result<ServerFrame<'static>, Error> {
    match message {
        ClientMessage::Subscribe(request) => subscribe(registry, connection, request),
        ClientMessage::Unsubscribe(request) => Ok(unsubscribe(registry, connection, request)),
        ClientMessage::Ping => Ok(ServerFrame::Pong),
    }
}

fn subscribe(
    registry: &ConnectionRegistry,
    connection: &Connection,
    request: SubscribeRequest,
) -> Result<ServerFrame<'static>, Error> {
    if let Some(blank) = request.event_types.iter().find(|t| t.trim().is_empty()) {
        return Err(Error::protocol(ProtocolErrorKind::InvalidSubscription(
            format!("empty event type {blank:?}"),
        )));
    }

    let scopes = request.scopes();
    let identity = connection.identity();
    let unheld = scopes.iter().find(|scope| {
        scope.scope_type != ScopeType::Global && !identity.holds(scope.scope_type, &scope.scope_id)
    });
    if let Some(scope) = unheld {
        return Err(Error::protocol(ProtocolErrorKind::InvalidSubscription(
            format!("no access to {} {}", scope.scope_type, scope.scope_id),
        )));
    }

    let subscription_id = registry
        .subscribe(connection.id(), request.event_types, scopes)
        .ok_or_else(|| {
            Error::protocol(ProtocolErrorKind::InvalidSubscription(
                "connection is closing".to_string(),
            ))
        })?;

    debug!(
        "Connection {} ({}) added subscription {}",
        connection.id(),
        connection.username(),
        subscription_id.value()
    );

    Ok(ServerFrame::Ack {
        action: "subscribe",
        data: AckData {
            success: true,
            subscription_id: Some(subscription_id),
            removed: None,
            message: "Subscribed successfully",
        },
    })
}

fn unsubscribe(
    registry: &ConnectionRegistry,
    connection: &Connection,
    request: UnsubscribeRequest,
) -> ServerFrame<'static> {
    let removed = registry.unsubscribe(connection.id(), &request.event_types);
    debug!(
        "Connection {} ({}) removed {} subscription(s)",
        connection.id(),
        connection.username(),
        removed
    );

    ServerFrame::Ack {
        action: "unsubscribe",
        data: AckData {
            success: true,
            subscription_id: None,
            removed: Some(removed),
            message: "Unsubscribed successfully",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::identity::{Grant, Identity};
    use events::PermissionLevel;
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn setup() -> (ConnectionRegistry, Arc<Connection>) {
        let registry = ConnectionRegistry::new();
        let connection = Arc::new(Connection::new(
            ConnectionId::from("c1"),
            Identity::new(
                "alice",
                vec![Grant::new(ScopeType::Project, "P1", PermissionLevel::Read)],
            ),
            8,
            4,
        ));
        registry.register(Arc::clone(&connection));
        (registry, connection)
    }

    fn reply(registry: &ConnectionRegistry, connection: &Connection, text: &str) -> Value {
        let frame = handle_text(registry, connection, text).unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    #[test]
    fn subscribe_is_acknowledged_with_id() {
        let (registry, connection) = setup();

        let value = reply(
            &registry,
            &connection,
            r#"{"type":"subscribe","data":{"eventTypes":["ticket.*"],"context":{"scopeType":"project","scopeID":"P1"}}}"#,
        );

        assert_eq!(value["type"], json!("ack"));
        assert_eq!(value["action"], json!("subscribe"));
        assert_eq!(value["data"]["success"], json!(true));
        assert!(value["data"]["subscriptionID"].is_u64());
        assert_eq!(connection.subscriptions().len(), 1);
    }

    #[test]
    fn subscribe_to_unheld_scope_is_rejected() {
        let (registry, connection) = setup();

        let value = reply(
            &registry,
            &connection,
            r#"{"type":"subscribe","data":{"context":{"scopeType":"project","scopeID":"P2"}}}"#,
        );

        assert_eq!(value["type"], json!("error"));
        assert_eq!(value["code"], json!("invalid_subscription"));
        assert!(connection.subscriptions().is_empty());
        assert!(connection.is_open());
    }

    #[test]
    fn unsubscribe_reports_removed_count() {
        let (registry, connection) = setup();
        handle_text(
            &registry,
            &connection,
            r#"{"type":"subscribe","data":{"eventTypes":["ticket.created"]}}"#,
        );

        let value = reply(
            &registry,
            &connection,
            r#"{"type":"unsubscribe","data":{"eventTypes":["ticket.created"]}}"#,
        );

        assert_eq!(value["action"], json!("unsubscribe"));
        assert_eq!(value["data"]["removed"], json!(1));
        assert!(connection.subscriptions().is_empty());
    }

    #[test]
    fn ping_gets_pong() {
        let (registry, connection) = setup();
        assert_eq!(
            reply(&registry, &connection, r#"{"type":"ping"}"#),
            json!({"type": "pong"})
        );
    }

    #[test]
    fn garbage_gets_error_frame_and_connection_survives() {
        let (registry, connection) = setup();

        let malformed = reply(&registry, &connection, "{{{");
        assert_eq!(malformed["code"], json!("malformed_frame"));

        let unknown = reply(&registry, &connection, r#"{"type":"shout"}"#);
        assert_eq!(unknown["code"], json!("unknown_type"));
        assert_eq!(unknown["error"], json!("Unknown message type: shout"));

        assert!(connection.is_open());
        assert!(registry.contains(connection.id()));
    }
}
