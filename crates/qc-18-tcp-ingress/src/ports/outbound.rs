//! # Driven Ports (Outbound SPI)
//!
//! Collaborators the host node must provide. The ingress core only
//! classifies and hands off; it never encodes bytes, serves bootstrap
//! requests or processes realtime traffic itself.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    DeserializeError, HandshakeError, HandshakeQuery, HandshakeResponse, Message, NodeId,
    TransportError,
};
use crate::service::{ResumeHandle, Session};

/// Accepted transport connection.
///
/// # Thread Safety
///
/// `close` may be called from any task while a read or write is pending;
/// the pending operation must then complete with [`TransportError::Closed`].
#[async_trait]
pub trait Socket: Send + Sync {
    /// Peer address captured at accept time.
    fn remote_endpoint(&self) -> SocketAddr;

    /// Read up to `buf.len()` bytes. End of stream is [`TransportError::Closed`].
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the whole buffer.
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// True once closed locally or by the peer.
    fn is_closed(&self) -> bool;
}

/// Stateful per-session message reader.
///
/// Keeps partial frames between calls, so one instance must serve exactly
/// one socket.
#[async_trait]
pub trait MessageDeserializer: Send {
    /// Read the next complete message from `socket`.
    async fn read(&mut self, socket: &dyn Socket) -> Result<Message, DeserializeError>;
}

/// Wire codec owned by the host.
pub trait MessageCodec: Send + Sync {
    /// Fresh deserializer for a new session.
    fn deserializer(&self) -> Box<dyn MessageDeserializer>;

    /// Encode a message for sending.
    fn serialize(&self, message: &Message) -> Vec<u8>;
}

/// Node-id proof provider and verifier.
pub trait HandshakeAuthority: Send + Sync {
    /// Our own query for `remote`, attached to outgoing responses.
    ///
    /// `None` when a cookie for that endpoint is already outstanding.
    fn prepare_query(&self, remote: SocketAddr) -> Option<HandshakeQuery>;

    /// Sign the peer's cookie, proving our node id.
    fn prepare_response(
        &self,
        query: &HandshakeQuery,
        v2: bool,
    ) -> Result<HandshakeResponse, HandshakeError>;

    /// Verify a response against the cookie issued to `remote`.
    fn verify_response(
        &self,
        response: &HandshakeResponse,
        remote: SocketAddr,
    ) -> Result<NodeId, HandshakeError>;

    /// Drop cookies issued more than `max_age` ago. Returns how many went.
    ///
    /// Called from the listener's maintenance task.
    fn purge(&self, _max_age: Duration) -> usize {
        0
    }
}

/// Serves bootstrap requests.
///
/// The session's receive loop stays paused until the server calls
/// [`ResumeHandle::resume`]; dropping the handle ends the session.
pub trait BootstrapServer: Send + Sync {
    /// Take over one bootstrap request.
    fn serve(&self, session: Arc<Session>, request: Message, resume: ResumeHandle);
}

/// Receives realtime traffic. Never blocks the receive loop.
pub trait RealtimeSink: Send + Sync {
    /// A session was promoted to realtime.
    fn connection_established(&self, _session: &Arc<Session>) {}

    /// Queue a realtime message for processing.
    fn queue(&self, session: &Arc<Session>, message: Message);
}
