use crate::error::{Error, ProtocolErrorKind};
use crate::queue::Frame;
use crate::subscription::{SubscriptionId, SubscriptionScope};
use events::{Event, Payload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Inbound control messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Ping,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubscribeRequest {
    #[serde(rename = "eventTypes", default)]
    pub event_types: Vec<String>,
    #[serde(default)]
    pub context: Option<SubscriptionScope>,
    #[serde(default)]
    pub contexts: Vec<SubscriptionScope>,
}

impl SubscribeRequest {
    /// The single `context` and the `contexts` list, merged.
    pub fn scopes(&self) -> Vec<SubscriptionScope> {
        let mut scopes = self.contexts.clone();
        if let Some(context) = &self.context {
            if !scopes.contains(context) {
                scopes.push(context.clone());
            }
        }
        scopes
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UnsubscribeRequest {
    #[serde(rename = "eventTypes", default)]
    pub event_types: Vec<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
}

impl ClientMessage {
    /// Parse a text frame. Unknown `type`s and bad `data` are reported
    /// separately so the client gets a precise error frame.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let envelope: Envelope = serde_json::from_str(text)?;

        match envelope.kind.as_str() {
            "subscribe" => Ok(ClientMessage::Subscribe(parse_data(envelope.data)?)),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe(parse_data(envelope.data)?)),
            "ping" => Ok(ClientMessage::Ping),
            other => Err(Error::protocol(ProtocolErrorKind::UnknownType(
                other.to_string(),
            ))),
        }
    }
}

fn parse_data<T>(data: Option<Value>) -> Result<T, Error>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match data {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => Ok(serde_json::from_value(value)?),
    }
}

#[derive(Debug, Serialize)]
pub struct AckData<'a> {
    pub success: bool,
    #[serde(rename = "subscriptionID", skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    pub message: &'a str,
}

/// Outbound frames. Serialized once and shared as a `Frame`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame<'a> {
    Connected {
        #[serde(rename = "connectionID")]
        connection_id: &'a str,
        username: &'a str,
        timestamp: i64,
    },
    Event {
        action: &'a str,
        #[serde(rename = "objectType")]
        object_type: &'a str,
        #[serde(rename = "entityID")]
        entity_id: &'a str,
        actor: &'a str,
        data: &'a Payload,
        timestamp: i64,
    },
    Ack {
        action: &'a str,
        data: AckData<'a>,
    },
    Pong,
    Error {
        code: &'a str,
        error: String,
    },
}

impl<'a> ServerFrame<'a> {
    pub fn event(event: &'a Event) -> Self {
        ServerFrame::Event {
            action: event.action().as_str(),
            object_type: event.object_type(),
            entity_id: event.entity_id(),
            actor: event.actor(),
            data: event.payload(),
            timestamp: event.timestamp().timestamp(),
        }
    }

    pub fn error(error: &Error) -> ServerFrame<'static> {
        ServerFrame::Error {
            code: error.code(),
            error: error.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}
