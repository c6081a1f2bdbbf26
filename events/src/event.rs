use crate::context::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Opaque key/value data attached to an event.
pub type Payload = Map<String, Value>;

/// What happened to the entity. CRUD handlers use the three lifecycle
/// actions; anything else (`released`, `archived`, `added`, ...) is carried
/// as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Created,
    Updated,
    Deleted,
    Custom(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
            Action::Custom(action) => action.as_str(),
        }
    }
}

// Handlers speak in request verbs ("create", "modify", "remove"), clients
// subscribe in past tense, so both spellings map onto the same action.
impl From<&str> for Action {
    fn from(action: &str) -> Self {
        match action.to_lowercase().as_str() {
            "created" | "create" => Action::Created,
            "updated" | "update" | "modify" => Action::Updated,
            "deleted" | "delete" | "remove" => Action::Deleted,
            other => Action::Custom(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(action: String) -> Self {
        Action::from(action.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let action = String::deserialize(deserializer)?;
        Ok(Action::from(action))
    }
}

/// An "entity changed" fact emitted by a CRUD handler after its write commits.
///
/// Events are immutable once constructed: fields are private and only exposed
/// through accessors, so a single `Arc<Event>` is shared across the whole
/// fan-out without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    action: Action,
    object_type: String,
    entity_id: String,
    actor: String,
    payload: Payload,
    context: Context,
    timestamp: DateTime<Utc>,
    event_type: String,
}

impl Event {
    pub fn new(
        action: Action,
        object_type: impl Into<String>,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
        payload: Payload,
        context: Context,
    ) -> Self {
        Self::with_timestamp(
            action,
            object_type,
            entity_id,
            actor,
            payload,
            context,
            Utc::now(),
        )
    }

    pub fn with_timestamp(
        action: Action,
        object_type: impl Into<String>,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
        payload: Payload,
        context: Context,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let object_type = object_type.into();
        let event_type = format!("{}.{}", object_type, action.as_str());

        Self {
            action,
            object_type,
            entity_id: entity_id.into(),
            actor: actor.into(),
            payload,
            context,
            timestamp,
            event_type,
        }
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// `"<objectType>.<action>"`, e.g. `"ticket.created"`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}
