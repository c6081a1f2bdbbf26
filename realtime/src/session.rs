//! Reader and writer loops driving one accepted connection.
//!
//! The loops are generic over the socket halves so they can be driven by an
//! axum `WebSocket` in production and by in-memory channels in tests.

use crate::connection::{Connection, ConnectionRegistry};
use crate::protocol;
use crate::queue::{EnqueueOutcome, Frame};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::*;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Timeouts applied to a single session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    pub idle: Duration,
    pub ping_period: Duration,
    pub write: Duration,
}

/// Run a session to completion: spawn the writer on the sink half, run the
/// reader on the stream half, and return once both have stopped. The
/// connection is unregistered on every exit path.
pub async fn run<S, St, E>(
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    sink: S,
    stream: St,
    timeouts: SessionTimeouts,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let writer = tokio::spawn(run_writer(
        Arc::clone(&connection),
        Arc::clone(&registry),
        sink,
        timeouts,
    ));

    run_reader(Arc::clone(&connection), Arc::clone(&registry), stream, timeouts.idle).await;

    if let Err(e) = writer.await {
        error!("Writer task for connection {} failed: {e}", connection.id());
    }
    info!(
        "Connection {} ({}) closed",
        connection.id(),
        connection.username()
    );
}

/// Drain the outbound queue onto the socket, interleaving protocol pings.
/// Stops on cancellation, on a failed or timed out write, or once a draining
/// connection has flushed its queue.
pub async fn run_writer<S>(
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    mut sink: S,
    timeouts: SessionTimeouts,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display + Send,
{
    let mut ping = time::interval_at(Instant::now() + timeouts.ping_period, timeouts.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            biased;
            _ = connection.cancelled() => break,
            frame = connection.queue().recv() => match frame {
                Some(frame) => text_message(frame),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match time::timeout(timeouts.write, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to connection {} failed: {e}", connection.id());
                break;
            }
            Err(_) => {
                warn!(
                    "Write to connection {} ({}) timed out",
                    connection.id(),
                    connection.username()
                );
                break;
            }
        }
    }

    // Best effort: the peer may already be gone.
    let _ = time::timeout(timeouts.write, sink.send(Message::Close(None))).await;
    registry.unregister_connection(&connection);
}

/// Process inbound frames until the peer closes, errors, goes idle, or the
/// connection is cancelled.
pub async fn run_reader<St, E>(
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    mut stream: St,
    idle_timeout: Duration,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = connection.cancelled() => break,
            next = time::timeout(idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!("Read from connection {} failed: {e}", connection.id());
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(
                    "Connection {} ({}) idle for {:?}, closing",
                    connection.id(),
                    connection.username(),
                    idle_timeout
                );
                break;
            }
        };

        let reply = match message {
            Message::Text(text) => protocol::handle_text(&registry, &connection, &text),
            Message::Binary(_) => protocol::unsupported_frame(),
            // Keep-alive traffic only resets the idle window.
            Message::Ping(_) | Message::Pong(_) => None,
            Message::Close(_) => break,
        };

        if let Some(reply) = reply {
            if let EnqueueOutcome::Overflowed { .. } = connection.enqueue(reply) {
                warn!(
                    "Connection {} ({}) stopped draining its queue, closing",
                    connection.id(),
                    connection.username()
                );
                break;
            }
        }
    }

    registry.unregister_connection(&connection);
}

fn text_message(frame: Frame) -> Message {
    Message::Text(frame.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionId;
    use crate::identity::{Grant, Identity};
    use events::{PermissionLevel, ScopeType};
    use futures::channel::mpsc;
    use serde_json::{json, Value};
    use std::convert::Infallible;

    const TIMEOUTS: SessionTimeouts = SessionTimeouts {
        idle: Duration::from_secs(60),
        ping_period: Duration::from_secs(54),
        write: Duration::from_secs(10),
    };

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        connection: Arc<Connection>,
        inbound: mpsc::UnboundedSender<Result<Message, Infallible>>,
        outbound: mpsc::UnboundedReceiver<Message>,
        session: tokio::task::JoinHandle<()>,
    }

    fn start() -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let connection = Arc::new(Connection::new(
            ConnectionId::from("c1"),
            Identity::new(
                "alice",
                vec![Grant::new(ScopeType::Project, "P1", PermissionLevel::Read)],
            ),
            16,
            4,
        ));
        registry.register(Arc::clone(&connection));

        let (inbound, stream) = mpsc::unbounded();
        let (sink, outbound) = mpsc::unbounded();
        let session = tokio::spawn(run(
            Arc::clone(&connection),
            Arc::clone(&registry),
            sink,
            stream,
            TIMEOUTS,
        ));

        Harness {
            registry,
            connection,
            inbound,
            outbound,
            session,
        }
    }

    async fn next_json(outbound: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        loop {
            match outbound.next().await {
                Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(Message::Ping(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    fn send_text(harness: &Harness, text: &str) {
        harness
            .inbound
            .unbounded_send(Ok(Message::Text(text.to_string())))
            .unwrap();
    }

    #[tokio::test]
    async fn subscribe_and_ping_are_answered_in_order() {
        let mut harness = start();

        send_text(&harness, r#"{"type":"subscribe","data":{"eventTypes":["ticket.*"]}}"#);
        send_text(&harness, r#"{"type":"ping"}"#);

        let ack = next_json(&mut harness.outbound).await;
        assert_eq!(ack["type"], json!("ack"));
        let pong = next_json(&mut harness.outbound).await;
        assert_eq!(pong, json!({"type": "pong"}));
        assert_eq!(harness.connection.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn queued_frames_are_written() {
        let mut harness = start();

        harness.connection.enqueue(Arc::from(r#"{"type":"event","n":1}"#));
        harness.connection.enqueue(Arc::from(r#"{"type":"event","n":2}"#));

        assert_eq!(next_json(&mut harness.outbound).await["n"], json!(1));
        assert_eq!(next_json(&mut harness.outbound).await["n"], json!(2));
    }

    #[tokio::test]
    async fn binary_frame_gets_error_and_session_continues() {
        let mut harness = start();

        harness
            .inbound
            .unbounded_send(Ok(Message::Binary(vec![1, 2, 3])))
            .unwrap();
        let error = next_json(&mut harness.outbound).await;
        assert_eq!(error["code"], json!("unsupported_frame"));

        send_text(&harness, r#"{"type":"ping"}"#);
        assert_eq!(next_json(&mut harness.outbound).await["type"], json!("pong"));
        assert!(harness.registry.contains(harness.connection.id()));
    }

    #[tokio::test]
    async fn client_close_unregisters_connection() {
        let harness = start();

        harness.inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        harness.session.await.unwrap();

        assert!(!harness.registry.contains(harness.connection.id()));
        assert!(!harness.connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_closed() {
        let harness = start();

        time::timeout(Duration::from_secs(120), harness.session)
            .await
            .unwrap()
            .unwrap();

        assert!(harness.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn writer_sends_protocol_pings() {
        let mut harness = start();

        time::sleep(Duration::from_secs(55)).await;

        assert!(matches!(
            harness.outbound.next().await,
            Some(Message::Ping(_))
        ));
    }

    #[tokio::test]
    async fn draining_connection_flushes_then_closes() {
        let mut harness = start();

        harness.connection.enqueue(Arc::from(r#"{"n":1}"#));
        harness.connection.begin_draining();

        assert_eq!(next_json(&mut harness.outbound).await["n"], json!(1));
        assert!(matches!(
            harness.outbound.next().await,
            Some(Message::Close(None))
        ));
        harness.session.await.unwrap();
        assert!(harness.registry.is_empty());
    }

    #[tokio::test]
    async fn evicted_connection_stops_both_loops() {
        let harness = start();

        harness.registry.unregister(harness.connection.id());

        time::timeout(Duration::from_secs(1), harness.session)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reconnect_under_same_id_survives_old_session_exit() {
        let harness = start();
        let reconnect = Arc::new(Connection::new(
            ConnectionId::from("c1"),
            Identity::new(
                "alice",
                vec![Grant::new(ScopeType::Project, "P1", PermissionLevel::Read)],
            ),
            16,
            4,
        ));

        harness.registry.register(Arc::clone(&reconnect));
        time::timeout(Duration::from_secs(1), harness.session)
            .await
            .unwrap()
            .unwrap();

        assert!(!harness.connection.is_open());
        assert!(reconnect.is_open());
        let registered = harness.registry.get(reconnect.id()).unwrap();
        assert!(Arc::ptr_eq(&registered, &reconnect));
        assert_eq!(harness.registry.connections_for_user("alice").len(), 1);
    }
}
