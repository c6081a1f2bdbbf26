use crate::error::{Error, IdentityErrorKind};
use crate::identity::token_from_parts;
use crate::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use log::*;
use realtime::Identity;

/// The identity behind an upgrade request, resolved through the permission
/// service from the request's bearer token.
pub(crate) struct AuthenticatedIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedIdentity {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        app_state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or_else(|| {
            debug!("WebSocket upgrade without a token");
            Error::identity(IdentityErrorKind::MissingToken)
        })?;

        let identity = app_state.identity_resolver.resolve(&token).await?;
        Ok(AuthenticatedIdentity(identity))
    }
}
