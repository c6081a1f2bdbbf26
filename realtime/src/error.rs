//! Error types for the `realtime` crate.
//!
//! Follows the same pattern as the other layers: a root Error struct holding an
//! error kind tree and an optional source for error chaining. None of these
//! errors ever reach the publishing side; they surface only to the connecting
//! client (as HTTP rejections or structured error frames).

use std::error::Error as StdError;
use std::fmt;

#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Registration(RegistrationErrorKind),
    Protocol(ProtocolErrorKind),
    Lifecycle(LifecycleErrorKind),
}

/// Errors when admitting a new connection.
#[derive(Debug, PartialEq)]
pub enum RegistrationErrorKind {
    CapacityReached,
    ShuttingDown,
}

/// Errors in an inbound client frame. Never fatal to the connection.
#[derive(Debug, PartialEq)]
pub enum ProtocolErrorKind {
    MalformedFrame,
    UnknownType(String),
    InvalidSubscription(String),
    UnsupportedFrame,
}

#[derive(Debug, PartialEq)]
pub enum LifecycleErrorKind {
    AlreadyRunning,
}

impl Error {
    pub fn new(error_kind: ErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    pub fn protocol(kind: ProtocolErrorKind) -> Self {
        Self::new(ErrorKind::Protocol(kind))
    }

    pub fn registration(kind: RegistrationErrorKind) -> Self {
        Self::new(ErrorKind::Registration(kind))
    }

    /// Stable machine-readable code sent to clients in error frames.
    pub fn code(&self) -> &'static str {
        match &self.error_kind {
            ErrorKind::Registration(RegistrationErrorKind::CapacityReached) => "capacity_reached",
            ErrorKind::Registration(RegistrationErrorKind::ShuttingDown) => "shutting_down",
            ErrorKind::Protocol(ProtocolErrorKind::MalformedFrame) => "malformed_frame",
            ErrorKind::Protocol(ProtocolErrorKind::UnknownType(_)) => "unknown_type",
            ErrorKind::Protocol(ProtocolErrorKind::InvalidSubscription(_)) => {
                "invalid_subscription"
            }
            ErrorKind::Protocol(ProtocolErrorKind::UnsupportedFrame) => "unsupported_frame",
            ErrorKind::Lifecycle(LifecycleErrorKind::AlreadyRunning) => "already_running",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Registration(RegistrationErrorKind::CapacityReached) => {
                write!(f, "Maximum client limit reached")
            }
            ErrorKind::Registration(RegistrationErrorKind::ShuttingDown) => {
                write!(f, "Event service is shutting down")
            }
            ErrorKind::Protocol(ProtocolErrorKind::MalformedFrame) => {
                write!(f, "Invalid message format")
            }
            ErrorKind::Protocol(ProtocolErrorKind::UnknownType(kind)) => {
                write!(f, "Unknown message type: {kind}")
            }
            ErrorKind::Protocol(ProtocolErrorKind::InvalidSubscription(reason)) => {
                write!(f, "Invalid subscription: {reason}")
            }
            ErrorKind::Protocol(ProtocolErrorKind::UnsupportedFrame) => {
                write!(f, "Binary frames are not supported")
            }
            ErrorKind::Lifecycle(LifecycleErrorKind::AlreadyRunning) => {
                write!(f, "Manager already running")
            }
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

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Protocol(ProtocolErrorKind::MalformedFrame),
        }
    }
}
