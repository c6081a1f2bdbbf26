use std::error::Error as StdError;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;
use realtime::error::{ErrorKind as RealtimeErrorKind, RegistrationErrorKind};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: WebErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum WebErrorKind {
    Identity(IdentityErrorKind),
    External(ExternalErrorKind),
    Upgrade(UpgradeErrorKind),
    Realtime(RealtimeErrorKind),
}

/// Failures establishing who is connecting.
#[derive(Debug, PartialEq)]
pub enum IdentityErrorKind {
    MissingToken,
    InvalidToken,
}

/// Failures talking to the permission service.
#[derive(Debug, PartialEq)]
pub enum ExternalErrorKind {
    Network,
    Other,
}

/// Upgrade requests refused before a connection is admitted.
#[derive(Debug, PartialEq)]
pub enum UpgradeErrorKind {
    Disabled,
    OriginNotAllowed,
}

impl Error {
    pub fn new(error_kind: WebErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn identity(kind: IdentityErrorKind) -> Self {
        Self::new(WebErrorKind::Identity(kind))
    }

    pub fn upgrade(kind: UpgradeErrorKind) -> Self {
        Self::new(WebErrorKind::Upgrade(kind))
    }

    pub fn external(kind: ExternalErrorKind, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            source: Some(Box::new(source)),
            error_kind: WebErrorKind::External(kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{:?}", self.error_kind)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self.error_kind {
            WebErrorKind::Identity(IdentityErrorKind::MissingToken) => {
                (StatusCode::UNAUTHORIZED, "Authentication token required").into_response()
            }
            WebErrorKind::Identity(IdentityErrorKind::InvalidToken) => {
                (StatusCode::UNAUTHORIZED, "Invalid or expired token").into_response()
            }
            WebErrorKind::External(ExternalErrorKind::Network) => {
                warn!("Permission service unreachable: {:?}", self.source);
                (StatusCode::BAD_GATEWAY, "BAD GATEWAY").into_response()
            }
            WebErrorKind::External(ExternalErrorKind::Other) => {
                error!("Permission service error: {:?}", self.source);
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
            WebErrorKind::Upgrade(UpgradeErrorKind::Disabled) => {
                (StatusCode::SERVICE_UNAVAILABLE, "WebSocket events are disabled").into_response()
            }
            WebErrorKind::Upgrade(UpgradeErrorKind::OriginNotAllowed) => {
                (StatusCode::FORBIDDEN, "Origin not allowed").into_response()
            }
            WebErrorKind::Realtime(RealtimeErrorKind::Registration(kind)) => {
                let message = match kind {
                    RegistrationErrorKind::CapacityReached => "Maximum client limit reached",
                    RegistrationErrorKind::ShuttingDown => "Event service is shutting down",
                };
                (StatusCode::SERVICE_UNAVAILABLE, message).into_response()
            }
            WebErrorKind::Realtime(kind) => {
                error!("Unexpected realtime error: {kind:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL SERVER ERROR").into_response()
            }
        }
    }
}

impl From<realtime::Error> for Error {
    fn from(err: realtime::Error) -> Self {
        Self {
            source: err.source,
            error_kind: WebErrorKind::Realtime(err.error_kind),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_connect() || err.is_timeout() || err.is_request() {
            ExternalErrorKind::Network
        } else {
            ExternalErrorKind::Other
        };
        Self::external(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (
                Error::identity(IdentityErrorKind::MissingToken),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::upgrade(UpgradeErrorKind::Disabled),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                Error::upgrade(UpgradeErrorKind::OriginNotAllowed),
                StatusCode::FORBIDDEN,
            ),
            (
                realtime::Error::registration(RegistrationErrorKind::CapacityReached).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
