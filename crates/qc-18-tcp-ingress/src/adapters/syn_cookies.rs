//! # Syn Cookies
//!
//! [`HandshakeAuthority`] backed by an ed25519 node key.
//!
//! Each remote endpoint gets at most one outstanding random cookie. A
//! response is accepted only if it signs the cookie issued to the endpoint
//! it arrives from; the cookie is consumed by the attempt.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rand::RngCore;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::domain::{
    Cookie, Hash, HandshakeError, HandshakeQuery, HandshakeResponse, HandshakeV2, NodeId,
};
use crate::ports::HandshakeAuthority;

struct IssuedCookie {
    cookie: Cookie,
    issued_at: Instant,
}

/// Cookie issuer and node-id prover.
pub struct SynCookieAuthority {
    signing_key: SigningKey,
    node_id: NodeId,
    genesis: Hash,
    cookies: Mutex<HashMap<SocketAddr, IssuedCookie>>,
}

impl SynCookieAuthority {
    /// Authority for an existing node key.
    pub fn new(signing_key: SigningKey, genesis: Hash) -> Self {
        let node_id = NodeId::new(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            node_id,
            genesis,
            cookies: Mutex::new(HashMap::new()),
        }
    }

    /// Authority with a fresh random node key.
    pub fn generate(genesis: Hash) -> Self {
        Self::new(SigningKey::generate(&mut rand::thread_rng()), genesis)
    }

    /// Our node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Outstanding cookies.
    pub fn cookies_count(&self) -> usize {
        self.cookies.lock().len()
    }
}

impl HandshakeAuthority for SynCookieAuthority {
    fn prepare_query(&self, remote: SocketAddr) -> Option<HandshakeQuery> {
        let mut cookies = self.cookies.lock();
        if cookies.contains_key(&remote) {
            return None;
        }

        let mut cookie = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut cookie);
        cookies.insert(
            remote,
            IssuedCookie {
                cookie,
                issued_at: Instant::now(),
            },
        );
        Some(HandshakeQuery { cookie })
    }

    fn prepare_response(
        &self,
        query: &HandshakeQuery,
        v2: bool,
    ) -> Result<HandshakeResponse, HandshakeError> {
        if query.cookie == [0u8; 32] {
            return Err(HandshakeError::MalformedQuery);
        }

        let v2 = v2.then(|| {
            let mut salt = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut salt);
            HandshakeV2 {
                salt,
                genesis: self.genesis,
            }
        });
        let payload = HandshakeResponse::signed_payload(&query.cookie, v2.as_ref());
        let signature = self.signing_key.sign(&payload).to_bytes();

        Ok(HandshakeResponse {
            node_id: self.node_id,
            signature,
            v2,
        })
    }

    fn verify_response(
        &self,
        response: &HandshakeResponse,
        remote: SocketAddr,
    ) -> Result<NodeId, HandshakeError> {
        if response.node_id == self.node_id {
            return Err(HandshakeError::SelfConnection);
        }

        let issued = self
            .cookies
            .lock()
            .remove(&remote)
            .ok_or(HandshakeError::UnknownCookie)?;

        if let Some(v2) = &response.v2 {
            if v2.genesis != self.genesis {
                debug!(remote = %remote, "Handshake response for another genesis");
                return Err(HandshakeError::GenesisMismatch);
            }
        }

        let verifying_key = VerifyingKey::from_bytes(response.node_id.as_bytes())
            .map_err(|_| HandshakeError::InvalidSignature)?;
        let signature = Signature::from_bytes(&response.signature);
        let payload = HandshakeResponse::signed_payload(&issued.cookie, response.v2.as_ref());

        verifying_key
            .verify(&payload, &signature)
            .map_err(|_| HandshakeError::InvalidSignature)?;

        Ok(response.node_id)
    }

    fn purge(&self, max_age: Duration) -> usize {
        let mut cookies = self.cookies.lock();
        let before = cookies.len();
        cookies.retain(|_, issued| issued.issued_at.elapsed() < max_age);
        let purged = before - cookies.len();
        if purged > 0 {
            trace!(purged, remaining = cookies.len(), "Purged expired syn cookies");
        }
        purged
    }
}
