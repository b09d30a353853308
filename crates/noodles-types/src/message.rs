//! Wire messages and their CBOR framing.
//!
//! Every frame is a two-element CBOR array `[tag, payload]` where `tag` is
//! the small integer code of [`MessageTag`] and `payload` is a CBOR map.
//! Clients send [`ClientMessage`]s; the server sends [`ServerMessage`]s.
//! A frame carrying a well-formed tag for the wrong direction decodes to
//! [`CodecError::UnexpectedTag`] so the session layer can tell protocol
//! violations apart from garbage.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_cbor::Value;

use crate::component::{Component, ComponentKind, ComponentRef};
use crate::ids::IDGroup;

/// Errors raised while framing or unframing a message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_cbor::Error),

    /// The frame is not a valid `[tag, payload]` CBOR array, or the payload
    /// does not match the tag's schema.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_cbor::Error),

    /// The tag code is not one the protocol defines.
    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    /// The tag is defined but not valid in this direction.
    #[error("message tag {0:?} is not accepted in this direction")]
    UnexpectedTag(MessageTag),
}

/// Integer codes identifying each message type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// Client introduction.
    Intro = 0,
    /// A component was created.
    CreateDelta = 1,
    /// A component was updated.
    UpdateDelta = 2,
    /// A component was deleted.
    DeleteDelta = 3,
    /// A client asks to invoke a method.
    InvokeRequest = 4,
    /// The result of an invocation, sent to the invoker only.
    InvokeReply = 5,
    /// A signal fired.
    SignalEvent = 6,
}

impl MessageTag {
    /// The integer code written on the wire.
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageTag {
    type Error = CodecError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Intro),
            1 => Ok(Self::CreateDelta),
            2 => Ok(Self::UpdateDelta),
            3 => Ok(Self::DeleteDelta),
            4 => Ok(Self::InvokeRequest),
            5 => Ok(Self::InvokeReply),
            6 => Ok(Self::SignalEvent),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Payload of [`MessageTag::Intro`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroPayload {
    /// Display name chosen by the client.
    pub client_name: String,
}

/// Payload shared by the three delta messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaPayload {
    /// Global sequence number of the mutation.
    pub seq: u64,
    /// Kind of the affected component.
    pub kind: ComponentKind,
    /// Identifier of the affected component.
    pub id: IDGroup,
    /// Component state after the mutation; absent on deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
}

/// Payload of [`MessageTag::InvokeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Client-chosen token echoed back in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,
    /// The method to invoke.
    pub method: IDGroup,
    /// Component the method acts on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ComponentRef>,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Machine-readable reason an invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The method ID is unknown, stale, or not a method.
    MethodNotFound,
    /// The target ID is unknown or stale.
    TargetNotFound,
    /// The arguments do not match the method's documentation.
    ArgumentMismatch,
    /// The delegate reported a failure.
    DelegateError,
    /// The delegate overran the invocation deadline.
    DelegateTimeout,
}

/// Structured error carried in an [`InvokeReply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyError {
    /// Failure class.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// Payload of [`MessageTag::InvokeReply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeReply {
    /// Token from the matching request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_id: Option<String>,
    /// Return value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl InvokeReply {
    /// A successful reply.
    pub const fn success(invoke_id: Option<String>, result: Value) -> Self {
        Self {
            invoke_id,
            result: Some(result),
            error: None,
        }
    }

    /// A failed reply.
    pub fn failure(invoke_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            invoke_id,
            result: None,
            error: Some(ReplyError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Whether the invocation succeeded.
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Payload of [`MessageTag::SignalEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// The signal that fired.
    pub signal: IDGroup,
    /// Component the signal concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ComponentRef>,
    /// Signal arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Directional messages
// ---------------------------------------------------------------------------

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// The single introduction that opens a session.
    Intro(IntroPayload),
    /// A method invocation.
    InvokeRequest(InvokeRequest),
}

impl ClientMessage {
    /// The tag this message is framed with.
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::Intro(_) => MessageTag::Intro,
            Self::InvokeRequest(_) => MessageTag::InvokeRequest,
        }
    }

    /// Frame this message as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Intro(p) => frame(self.tag(), p),
            Self::InvokeRequest(p) => frame(self.tag(), p),
        }
    }

    /// Parse a frame received from a client.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (tag, payload) = unframe(bytes)?;
        match tag {
            MessageTag::Intro => Ok(Self::Intro(payload_as(payload)?)),
            MessageTag::InvokeRequest => Ok(Self::InvokeRequest(payload_as(payload)?)),
            other => Err(CodecError::UnexpectedTag(other)),
        }
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A component was created.
    CreateDelta(DeltaPayload),
    /// A component was updated.
    UpdateDelta(DeltaPayload),
    /// A component was deleted.
    DeleteDelta(DeltaPayload),
    /// Reply to the receiving session's own invocation.
    InvokeReply(InvokeReply),
    /// A signal fired.
    SignalEvent(SignalEvent),
}

impl ServerMessage {
    /// The tag this message is framed with.
    pub const fn tag(&self) -> MessageTag {
        match self {
            Self::CreateDelta(_) => MessageTag::CreateDelta,
            Self::UpdateDelta(_) => MessageTag::UpdateDelta,
            Self::DeleteDelta(_) => MessageTag::DeleteDelta,
            Self::InvokeReply(_) => MessageTag::InvokeReply,
            Self::SignalEvent(_) => MessageTag::SignalEvent,
        }
    }

    /// Sequence number, for delta messages.
    pub const fn seq(&self) -> Option<u64> {
        match self {
            Self::CreateDelta(p) | Self::UpdateDelta(p) | Self::DeleteDelta(p) => Some(p.seq),
            Self::InvokeReply(_) | Self::SignalEvent(_) => None,
        }
    }

    /// Frame this message as CBOR.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::CreateDelta(p) | Self::UpdateDelta(p) | Self::DeleteDelta(p) => {
                frame(self.tag(), p)
            }
            Self::InvokeReply(p) => frame(self.tag(), p),
            Self::SignalEvent(p) => frame(self.tag(), p),
        }
    }

    /// Parse a frame received from the server.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (tag, payload) = unframe(bytes)?;
        match tag {
            MessageTag::CreateDelta => Ok(Self::CreateDelta(payload_as(payload)?)),
            MessageTag::UpdateDelta => Ok(Self::UpdateDelta(payload_as(payload)?)),
            MessageTag::DeleteDelta => Ok(Self::DeleteDelta(payload_as(payload)?)),
            MessageTag::InvokeReply => Ok(Self::InvokeReply(payload_as(payload)?)),
            MessageTag::SignalEvent => Ok(Self::SignalEvent(payload_as(payload)?)),
            other => Err(CodecError::UnexpectedTag(other)),
        }
    }
}

fn frame<T: Serialize>(tag: MessageTag, payload: &T) -> Result<Vec<u8>, CodecError> {
    serde_cbor::to_vec(&(tag.code(), payload)).map_err(CodecError::Encode)
}

fn unframe(bytes: &[u8]) -> Result<(MessageTag, Value), CodecError> {
    let (code, payload): (u8, Value) = serde_cbor::from_slice(bytes).map_err(CodecError::Decode)?;
    Ok((MessageTag::try_from(code)?, payload))
}

fn payload_as<T: DeserializeOwned>(payload: Value) -> Result<T, CodecError> {
    serde_cbor::value::from_value(payload).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intro_frame_is_tag_and_map() {
        let msg = ClientMessage::Intro(IntroPayload {
            client_name: String::from("viewer"),
        });
        let bytes = msg.encode().unwrap_or_default();
        let raw: Result<Value, _> = serde_cbor::from_slice(&bytes);
        assert!(matches!(
            raw,
            Ok(Value::Array(ref items))
                if items.len() == 2
                    && items.first() == Some(&Value::Integer(0))
                    && matches!(items.get(1), Some(Value::Map(_)))
        ));
    }

    #[test]
    fn client_decode_rejects_server_tags() {
        let reply = ServerMessage::InvokeReply(InvokeReply::success(None, Value::Null));
        let bytes = reply.encode().unwrap_or_default();
        assert!(matches!(
            ClientMessage::decode(&bytes),
            Err(CodecError::UnexpectedTag(MessageTag::InvokeReply))
        ));
    }

    #[test]
    fn unknown_tag_is_reported() {
        let bytes = serde_cbor::to_vec(&(42_u8, Value::Null)).unwrap_or_default();
        assert!(matches!(
            ClientMessage::decode(&bytes),
            Err(CodecError::UnknownTag(42))
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            ClientMessage::decode(b"\xff\x00not cbor"),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn invoke_request_defaults_optional_fields() {
        // `[4, {"method": [0, 0]}]`
        let mut map = std::collections::BTreeMap::new();
        map.insert(
            Value::Text(String::from("method")),
            Value::Array(vec![Value::Integer(0), Value::Integer(0)]),
        );
        let bytes = serde_cbor::to_vec(&(4_u8, Value::Map(map))).unwrap_or_default();
        let decoded = ClientMessage::decode(&bytes);
        assert!(matches!(
            decoded,
            Ok(ClientMessage::InvokeRequest(InvokeRequest {
                invoke_id: None,
                target: None,
                ref args,
                ..
            })) if args.is_empty()
        ));
    }

    #[test]
    fn server_message_survives_framing() {
        let msg = ServerMessage::DeleteDelta(DeltaPayload {
            seq: 12,
            kind: ComponentKind::Geometry,
            id: IDGroup::new(0, 1),
            component: None,
        });
        let bytes = msg.encode().unwrap_or_default();
        let decoded = ServerMessage::decode(&bytes).ok();
        assert_eq!(decoded.as_ref().and_then(ServerMessage::seq), Some(12));
        assert_eq!(decoded, Some(msg));
    }
}
