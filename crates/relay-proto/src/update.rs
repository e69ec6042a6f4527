//! Game-state update messages carried on the datagram channel.

use serde_json::{Map, Value};
use thiserror::Error;

/// Top-level game state: string keys to arbitrary JSON values.
pub type StateSnapshot = Map<String, Value>;

pub const FULL_UPDATE: &str = "full_update";
pub const PARTIAL_UPDATE: &str = "partial_update";

/// A decoded datagram. The `type` tag is inspected exactly once, here.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateMessage {
    /// Replace the whole store.
    Full(StateSnapshot),
    /// Overwrite only the top-level keys present.
    Partial(StateSnapshot),
    /// Any other tag; dropped by receivers.
    Unknown { tag: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid utf-8 json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a json object")]
    NotAnObject,
    #[error("payload has no string `type` field")]
    MissingType,
    #[error("`{tag}` payload has no object `state` field")]
    MissingState { tag: String },
}

impl UpdateMessage {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let Value::Object(mut object) = serde_json::from_slice::<Value>(bytes)? else {
            return Err(DecodeError::NotAnObject);
        };
        let tag = match object.remove("type") {
            Some(Value::String(tag)) => tag,
            _ => return Err(DecodeError::MissingType),
        };
        let full = match tag.as_str() {
            FULL_UPDATE => true,
            PARTIAL_UPDATE => false,
            _ => return Ok(UpdateMessage::Unknown { tag }),
        };
        let state = match object.remove("state") {
            Some(Value::Object(state)) => state,
            _ => return Err(DecodeError::MissingState { tag }),
        };
        Ok(if full {
            UpdateMessage::Full(state)
        } else {
            UpdateMessage::Partial(state)
        })
    }

    pub fn tag(&self) -> &str {
        match self {
            UpdateMessage::Full(_) => FULL_UPDATE,
            UpdateMessage::Partial(_) => PARTIAL_UPDATE,
            UpdateMessage::Unknown { tag } => tag,
        }
    }

    /// The wire form producers send: `{"type": .., "state": {..}}`.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String(self.tag().to_owned()));
        match self {
            UpdateMessage::Full(state) | UpdateMessage::Partial(state) => {
                object.insert("state".into(), Value::Object(state.clone()));
            }
            UpdateMessage::Unknown { .. } => {}
        }
        Value::Object(object)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a `Value` tree cannot fail.
        serde_json::to_vec(&self.to_value()).unwrap_or_default()
    }
}
