//! # Domain Errors
//!
//! Error taxonomy of the ingress subsystem:
//! - admission: [`RejectReason`] (socket closed, silent to the peer)
//! - protocol / transport / timeout: [`AbortReason`] (session stops)
//! - listener lifecycle: [`ListenerError`]

use std::io;

use thiserror::Error;

use super::message::MessageKind;
use super::role::ConnectionRole;

/// Socket level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Socket closed locally or by the peer.
    #[error("connection closed")]
    Closed,

    /// Underlying I/O error.
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        /// Error kind reported by the OS.
        kind: io::ErrorKind,
        /// Raw OS error code, if any.
        code: Option<i32>,
        /// Error description.
        message: String,
    },
}

impl TransportError {
    /// Accept failed because the process ran out of file descriptors.
    pub fn is_descriptor_exhaustion(&self) -> bool {
        match self {
            // EMFILE / ENFILE
            TransportError::Io { code, .. } => matches!(code, Some(23) | Some(24)),
            TransportError::Closed => false,
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::Closed,
            kind => TransportError::Io {
                kind,
                code: err.raw_os_error(),
                message: err.to_string(),
            },
        }
    }
}

/// Failure reported by a message deserializer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeserializeError {
    /// Reading from the socket failed.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// Header could not be parsed.
    #[error("invalid header")]
    InvalidHeader,

    /// Header names another network.
    #[error("invalid network")]
    InvalidNetwork,

    /// Peer protocol version is below the supported minimum.
    #[error("outdated protocol version")]
    OutdatedVersion,

    /// Unknown message type byte.
    #[error("invalid message type {0:#04x}")]
    InvalidMessageType(u8),

    /// Body could not be parsed.
    #[error("invalid {0} message")]
    InvalidMessage(MessageKind),

    /// Declared payload exceeds the size limit.
    #[error("message size {0} too big")]
    MessageSizeTooBig(usize),

    /// Publish carries insufficient work.
    #[error("insufficient work")]
    InsufficientWork,

    /// Publish already seen by the duplicate filter.
    #[error("duplicate publish message")]
    DuplicatePublish,

    /// Confirm-ack already seen by the duplicate filter.
    #[error("duplicate confirm_ack message")]
    DuplicateConfirmAck,
}

impl DeserializeError {
    /// Errors after which the stream is still aligned and reading may go on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeserializeError::InsufficientWork
                | DeserializeError::DuplicatePublish
                | DeserializeError::DuplicateConfirmAck
        )
    }
}

/// Failure of the node-id handshake.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Neither query nor response present.
    #[error("handshake carries neither query nor response")]
    Empty,

    /// Query could not be answered.
    #[error("malformed handshake query")]
    MalformedQuery,

    /// No cookie was issued to this endpoint, or it was already used.
    #[error("no cookie issued to endpoint")]
    UnknownCookie,

    /// Signature does not match the claimed node id.
    #[error("invalid handshake signature")]
    InvalidSignature,

    /// Peer claims our own node id.
    #[error("handshake from own node id")]
    SelfConnection,

    /// v2 response for another genesis.
    #[error("genesis mismatch")]
    GenesisMismatch,
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// Deserializer or socket failure.
    #[error("receive failed: {0}")]
    Receive(#[from] DeserializeError),

    /// Handshake rejected.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A second handshake query arrived.
    #[error("duplicate handshake query")]
    DuplicateHandshake,

    /// Realtime connections are disabled by configuration.
    #[error("realtime connections disabled")]
    RealtimeDisabled,

    /// Writing the handshake response failed.
    #[error("handshake response write failed: {0}")]
    ResponseWrite(TransportError),

    /// Message not valid for the session's current role.
    #[error("unexpected {kind} on {role} connection")]
    UnexpectedMessage {
        /// Role at the time the message arrived.
        role: ConnectionRole,
        /// Offending message.
        kind: MessageKind,
    },

    /// Promotion refused (bootstrap not allowed, limit reached, or already
    /// classified).
    #[error("cannot switch to {0} connection")]
    PromotionRefused(ConnectionRole),

    /// The bootstrap server released the session without resuming it.
    #[error("bootstrap server finished")]
    BootstrapFinished,

    /// Idle timer fired.
    #[error("idle timeout")]
    Timeout,

    /// Stopped by the owner.
    #[error("stopped")]
    Stopped,
}

/// Why an accepted socket was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    /// Inbound connection ceiling reached.
    #[error("max inbound connections reached")]
    MaxInbound,

    /// Too many connections from the same IP.
    #[error("max connections per IP reached")]
    MaxPerIp,

    /// Too many connections from the same subnetwork.
    #[error("max connections per subnetwork reached")]
    MaxPerSubnetwork,

    /// Listener is stopped.
    #[error("listener stopped")]
    Stopped,
}

/// Listener lifecycle errors.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// `start` called twice.
    #[error("listener already started")]
    AlreadyStarted,

    /// `start` called after `stop`.
    #[error("listener stopped")]
    Stopped,
}
