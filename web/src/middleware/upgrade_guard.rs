use crate::error::{Error, UpgradeErrorKind};
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use log::*;

/// Rejects upgrade requests before any identity lookup happens: the feature
/// flag must be on and the `Origin` header, when present, must be allowed.
pub async fn guard_upgrade(
    State(app_state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if !app_state.config.websocket_enabled {
        return Error::upgrade(UpgradeErrorKind::Disabled).into_response();
    }

    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !app_state.config.is_origin_allowed(origin) {
        warn!("Rejected WebSocket upgrade from origin {origin:?}");
        return Error::upgrade(UpgradeErrorKind::OriginNotAllowed).into_response();
    }

    next.run(request).await
}
