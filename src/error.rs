//! Error kinds for the codec, the remote-object protocol, and the public API.
//!
//! Mirrors the propagation policy in spec.md §7: codec/protocol/transport
//! errors are connection-fatal, remote errors and local misuse are per-call.

use thiserror::Error;

/// Malformed wire bytes. Always connection-fatal.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unrepresentable integer (major type 1 payload exceeds i64 range)")]
    UnrepresentableInteger,
    #[error("unknown major type {0}")]
    UnknownMajorType(u8),
    #[error("unknown tag {0}")]
    UnknownTag(u64),
    #[error("unknown simple value {0}")]
    UnknownSimple(u8),
    #[error("map key did not decode to text")]
    NonTextMapKey,
    #[error("invalid utf-8 in text value: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("invalid uuid bytes: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("invalid RFC 3339 timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),
    #[error("tag 0 (datetime) payload did not decode to text")]
    NonTextTimestamp,
    #[error("remote-object reference did not decode as [id, type-name]")]
    InvalidRemoteObjectRef,
}

/// Structurally valid CBOR that violates the remote-object framing rules.
/// Always connection-fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message addressed unknown object id {0}")]
    UnknownObjectId(u64),
    #[error("message body was empty")]
    EmptyMessage,
    #[error("opcode must be a uint")]
    InvalidOpcode,
    #[error("unknown opcode {0}")]
    UnknownOpcode(u64),
    #[error("call-id must be a uint")]
    InvalidCallId,
    #[error("answer for call-id {0} has no matching pending call (unknown or already answered)")]
    UnknownCallId(u64),
    #[error("answer frame must have exactly 3 elements (call-id, status, payload), got {0}")]
    InvalidAnswerArity(usize),
    #[error("answer status must be 0 or 2, got {0}")]
    InvalidStatus(u64),
    #[error("error answer payload must be text")]
    InvalidErrorPayload,
    #[error("notification name must be text")]
    InvalidNotificationName,
    #[error("no handler registered for notification {name}")]
    UnhandledNotification { name: String },
    #[error("object id must be a uint")]
    InvalidObjectId,
}

/// A status-2 answer from the server. Surfaced only to the caller of that call.
#[derive(Debug, Error, Clone)]
#[error("remote error: {0}")]
pub struct RemoteError(pub String);

/// Read/write failure on the underlying transport.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub Box<dyn std::error::Error + Send + Sync>);

impl TransportError {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        TransportError(Box::new(err))
    }
}

/// The outcome of a `call`: either the connection tore down, a protocol
/// violation occurred, the transport failed, or the server answered with an
/// error.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("connection closed")]
    ConnectionClosed,
}

/// Errors surfaced to a consumer of a streaming result.
#[derive(Debug, Error, Clone)]
pub enum ResultError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("connection closed before the stream completed")]
    ConnectionClosed,
    #[error("already read")]
    AlreadyRead,
}

/// Top-level error type for the public API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Result(#[from] ResultError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("{0} did not return a {1} remote object")]
    UnexpectedReturnType(&'static str, &'static str),
    #[error("invalid driver url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
}

impl From<CallError> for ClientError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Protocol(e) => ClientError::Protocol(e),
            CallError::Transport(e) => ClientError::Transport(e),
            CallError::Remote(e) => ClientError::Remote(e),
            CallError::ConnectionClosed => ClientError::ConnectionClosed,
        }
    }
}
