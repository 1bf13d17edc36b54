//! Message types

use core_types::Tag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Whether a message asks for work or answers a previous request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Invoke `function` on the receiving side
    Request,
    /// Result of a request previously sent by the receiving side
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

/// Type-erased message payload
///
/// Requests carry call arguments, responses carry the call outcome. The
/// payload is held as a JSON value so that any serde type can travel through
/// it and channels are free to pick their own byte encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessagePayload {
    data: Value,
}

impl MessagePayload {
    /// Creates a new payload from serializable data
    pub fn new<T: Serialize + ?Sized>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            data: serde_json::to_value(data)?,
        })
    }

    /// Wraps an already-built JSON value
    pub fn from_value(data: Value) -> Self {
        Self { data }
    }

    /// An empty (`null`) payload
    pub fn empty() -> Self {
        Self { data: Value::Null }
    }

    /// Deserializes the payload into a specific type
    pub fn deserialize<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Returns the JSON value
    pub fn as_value(&self) -> &Value {
        &self.data
    }

    /// Consumes the payload, returning the JSON value
    pub fn into_value(self) -> Value {
        self.data
    }
}

impl Default for MessagePayload {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for MessagePayload {
    fn from(data: Value) -> Self {
        Self::from_value(data)
    }
}

/// A message exchanged over a channel
///
/// On the wire a message is the 4-tuple `[tag, kind, function, payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct Message {
    /// Correlation tag, allocated by the side that issued the request
    pub tag: Tag,
    /// Request or response
    pub kind: MessageKind,
    /// Function being invoked or answered
    pub function: String,
    /// Arguments (request) or outcome (response)
    pub payload: MessagePayload,
}

impl Message {
    /// Creates a request message
    pub fn request(tag: Tag, function: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            tag,
            kind: MessageKind::Request,
            function: function.into(),
            payload,
        }
    }

    /// Creates a response message answering the request tagged `tag`
    pub fn response(tag: Tag, function: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            tag,
            kind: MessageKind::Response,
            function: function.into(),
            payload,
        }
    }

    /// Checks if this is a request
    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    /// Checks if this is a response
    pub fn is_response(&self) -> bool {
        self.kind == MessageKind::Response
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.kind, self.tag, self.function)
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage(Tag, MessageKind, String, MessagePayload);

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let WireMessage(tag, kind, function, payload) = wire;
        Self {
            tag,
            kind,
            function,
            payload,
        }
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        WireMessage(message.tag, message.kind, message.function, message.payload)
    }
}
