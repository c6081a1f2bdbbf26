//! Resolution of an upgrade request's bearer token into a realtime `Identity`.
//!
//! The permission service is a black box: it authenticates the token and
//! reports the scopes the user holds. The result is snapshotted onto the
//! connection and never refreshed.

use crate::error::{Error, ExternalErrorKind, IdentityErrorKind, WebErrorKind};
use async_trait::async_trait;
use axum::extract::Query;
use axum::http::{header, request::Parts, HeaderMap, Uri};
use log::*;
use realtime::{Grant, Identity};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use service::Config;
use std::sync::Arc;

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity, Error>;
}

/// Extract the bearer token from an upgrade request. Checked in order: the
/// `token` query parameter, an `Authorization: Bearer` header, then the
/// `Sec-WebSocket-Protocol` header (browsers cannot set custom headers on a
/// WebSocket handshake).
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    token_from_query(&parts.uri)
        .or_else(|| bearer_token(&parts.headers))
        .or_else(|| protocol_token(&parts.headers))
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_query(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|token| !token.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn protocol_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::SEC_WEBSOCKET_PROTOCOL)?.to_str().ok()?;
    Some(value.trim().to_string()).filter(|token| !token.is_empty())
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct AuthenticateResponse {
    username: String,
}

#[derive(Deserialize)]
struct PermissionsResponse {
    #[serde(default)]
    permissions: Vec<Grant>,
}

/// HTTP client for the external authentication/permission service.
pub struct PermissionServiceClient {
    base_url: Url,
    client: reqwest::Client,
}

impl PermissionServiceClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let base_url = config.permission_service_url().ok_or_else(|| {
            warn!("Failed to get permission service URL from config");
            Error::new(WebErrorKind::External(ExternalErrorKind::Other))
        })?;

        let base_url = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                warn!("Permission service URL {base_url} is not a valid base URL");
                Error::new(WebErrorKind::External(ExternalErrorKind::Other))
            })?;

        Ok(Self {
            base_url,
            client: reqwest::Client::builder()
                .use_rustls_tls()
                .timeout(config.permission_service_timeout())
                .build()?,
        })
    }

    /// Append percent-encoded path segments to the base URL.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL always has a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn authenticate(&self, token: &str) -> Result<String, Error> {
        let response = self
            .client
            .post(self.endpoint(&["authenticate"]))
            .json(&AuthenticateRequest { token })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json::<AuthenticateResponse>().await?.username),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::identity(IdentityErrorKind::InvalidToken))
            }
            status => {
                warn!("Permission service answered authentication with {status}");
                Err(Error::new(WebErrorKind::External(ExternalErrorKind::Other)))
            }
        }
    }

    async fn permissions(&self, username: &str) -> Result<Vec<Grant>, Error> {
        let response = self
            .client
            .get(self.endpoint(&["permissions", username]))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<PermissionsResponse>().await?.permissions)
    }
}

#[async_trait]
impl IdentityResolver for PermissionServiceClient {
    async fn resolve(&self, token: &str) -> Result<Identity, Error> {
        let username = self.authenticate(token).await?;
        let grants = self.permissions(&username).await?;
        debug!("Resolved identity {username} with {} grant(s)", grants.len());
        Ok(Identity::new(username, grants))
    }
}

/// Build the resolver configured for this process.
pub fn resolver(config: &Config) -> Result<Arc<dyn IdentityResolver>, Error> {
    Ok(Arc::new(PermissionServiceClient::new(config)?))
}
