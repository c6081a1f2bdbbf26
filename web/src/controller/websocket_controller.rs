use crate::error::Error;
use crate::extractors::authenticated_identity::AuthenticatedIdentity;
use crate::AppState;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::*;
use std::sync::Arc;

/// GET upgrade to a WebSocket carrying real-time entity events.
///
/// Authentication and capacity are checked before the upgrade so a rejected
/// client gets a plain HTTP error. The connection is registered only once the
/// handshake has completed.
pub(crate) async fn connect(
    State(app_state): State<AppState>,
    AuthenticatedIdentity(identity): AuthenticatedIdentity,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, Error> {
    app_state.manager.can_accept()?;

    debug!("Upgrading WebSocket connection for {}", identity.username);

    let mut ws = ws.max_message_size(app_state.config.max_message_size);
    // Echo the protocol back when the token travelled in it, or browsers
    // abort the handshake.
    if let Some(protocol) = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
    {
        ws = ws.protocols([protocol.trim().to_string()]);
    }

    let manager = Arc::clone(&app_state.manager);
    Ok(ws.on_upgrade(move |mut socket| async move {
        match manager.connect(identity) {
            Ok(connection) => manager.run_session(connection, socket).await,
            Err(e) => {
                // Capacity was taken between the check and the handshake.
                warn!("Closing upgraded socket: {e}");
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AGAIN,
                        reason: e.to_string().into(),
                    })))
                    .await;
            }
        }
    }))
}

/// GET connection and delivery counters
pub(crate) async fn stats(State(app_state): State<AppState>) -> impl IntoResponse {
    Json(app_state.manager.stats())
}
