//! Node-id handshake payloads and outcomes.
//!
//! A handshake message carries a query, a response, or both:
//!
//! ```text
//! peer                              node
//!  │ ── NodeIdHandshake{query} ───────▶ │  sign peer cookie
//!  │ ◀── NodeIdHandshake{query',resp} ─ │  (own cookie attached)
//!  │ ── NodeIdHandshake{resp'} ───────▶ │  verify → realtime
//! ```

use super::value_objects::{Cookie, Hash, NodeId};

/// Query half: a cookie the receiver must sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeQuery {
    /// Random challenge issued by the sender.
    pub cookie: Cookie,
}

/// Extra fields carried by v2 responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeV2 {
    /// Random salt mixed into the signed payload.
    pub salt: [u8; 32],
    /// Genesis hash of the responder's ledger.
    pub genesis: Hash,
}

/// Response half: proof that the sender owns `node_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Claimed identity of the responder.
    pub node_id: NodeId,
    /// ed25519 signature over the cookie (and v2 fields when present).
    pub signature: [u8; 64],
    /// v2 extension, absent for legacy responses.
    pub v2: Option<HandshakeV2>,
}

impl HandshakeResponse {
    /// Bytes covered by the signature for a given cookie.
    pub fn signed_payload(cookie: &Cookie, v2: Option<&HandshakeV2>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(96);
        payload.extend_from_slice(cookie);
        if let Some(v2) = v2 {
            payload.extend_from_slice(&v2.salt);
            payload.extend_from_slice(&v2.genesis);
        }
        payload
    }
}

/// Node-id handshake message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeIdHandshake {
    /// Challenge for the receiver, if any.
    pub query: Option<HandshakeQuery>,
    /// Answer to a challenge the receiver sent earlier, if any.
    pub response: Option<HandshakeResponse>,
    /// Sender asks for v2 responses.
    pub v2: bool,
    /// Sender only wants a bootstrap connection.
    pub bootstrap_only: bool,
}

impl NodeIdHandshake {
    /// Query-only handshake opening an exchange.
    pub fn query(cookie: Cookie, v2: bool) -> Self {
        Self {
            query: Some(HandshakeQuery { cookie }),
            response: None,
            v2,
            bootstrap_only: false,
        }
    }

    /// Response-only handshake closing an exchange.
    pub fn response(response: HandshakeResponse) -> Self {
        let v2 = response.v2.is_some();
        Self {
            query: None,
            response: Some(response),
            v2,
            bootstrap_only: false,
        }
    }

    /// True when neither half is present.
    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.response.is_none()
    }
}

/// Outcome of a handshake message that did not abort the session.
///
/// Aborts are reported as `Err(AbortReason)` by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Query answered; waiting for the peer's response.
    Handshake,
    /// Peer identity verified; connection is realtime.
    Realtime,
    /// Peer identity verified and bootstrap-only negotiated.
    Bootstrap,
}
