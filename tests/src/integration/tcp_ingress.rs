//! # TCP Ingress Loopback Tests
//!
//! Drives a real listener over loopback sockets:
//!
//! ```text
//! [Test peer] ──TCP──→ [TcpListener (18)] ──admit──→ [Session]
//!                                                       │
//!                      ┌────────────────────────────────┤
//!                      ↓                                ↓
//!            [RecordingBootstrapServer]      [RecordingRealtimeSink]
//! ```
//!
//! Frames on the wire are `[type u8][len u16 BE][payload]`, just enough
//! to carry handshakes and a few bootstrap / realtime messages.
//!
//! ## Test Categories
//!
//! 1. **Handshake**: query, response, promotion to realtime
//! 2. **Bootstrap**: direct bootstrap requests and resume
//! 3. **Admission**: per-IP limit over real sockets
//! 4. **Shutdown**: protocol violations and listener stop

// =============================================================================
// TEST FIXTURES (only compiled during tests)
// =============================================================================

#[cfg(test)]
use std::net::SocketAddr;

#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
use async_trait::async_trait;

#[cfg(test)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[cfg(test)]
use tokio::net::TcpStream;

#[cfg(test)]
use tracing_subscriber::EnvFilter;

#[cfg(test)]
use qc_18_tcp_ingress::domain::{BulkPull, Publish, TelemetryReq};

#[cfg(test)]
use qc_18_tcp_ingress::testing::{
    wait_until, RecordingBootstrapServer, RecordingRealtimeSink,
};

#[cfg(test)]
use qc_18_tcp_ingress::{
    ConnectionDiagnostics, ConnectionRole, DeserializeError, HandshakeAuthority, HandshakeQuery,
    HandshakeResponse, HandshakeV2, Keepalive, ListenerConfig, Message, MessageCodec,
    MessageDeserializer, MessageKind, NodeIdHandshake, OnConnected, Session, SessionContext,
    Socket, SynCookieAuthority, TcpListener,
};

#[cfg(test)]
const GENESIS: [u8; 32] = [0x5A; 32];

#[cfg(test)]
const WAIT: Duration = Duration::from_secs(5);

#[cfg(test)]
const HEADER_LEN: usize = 3;

/// Logs go to the test writer; set `RUST_LOG=qc_18_tcp_ingress=debug` to see them.
#[cfg(test)]
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// -----------------------------------------------------------------------------
// Frame codec
// -----------------------------------------------------------------------------

#[cfg(test)]
fn kind_byte(kind: MessageKind) -> u8 {
    MessageKind::ALL
        .iter()
        .position(|k| *k == kind)
        .map(|i| i as u8)
        .unwrap_or(u8::MAX)
}

#[cfg(test)]
fn encode(message: &Message) -> Vec<u8> {
    let payload = match message {
        Message::NodeIdHandshake(handshake) => encode_handshake(handshake),
        Message::Publish(publish) => publish.block.clone(),
        _ => Vec::new(),
    };
    let mut frame = vec![kind_byte(message.kind())];
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend(payload);
    frame
}

#[cfg(test)]
fn encode_handshake(handshake: &NodeIdHandshake) -> Vec<u8> {
    let mut flags = 0u8;
    if handshake.query.is_some() {
        flags |= 0x01;
    }
    if handshake.response.is_some() {
        flags |= 0x02;
    }
    if handshake.response.as_ref().is_some_and(|r| r.v2.is_some()) {
        flags |= 0x04;
    }
    if handshake.bootstrap_only {
        flags |= 0x08;
    }
    if handshake.v2 {
        flags |= 0x10;
    }

    let mut out = vec![flags];
    if let Some(query) = &handshake.query {
        out.extend_from_slice(&query.cookie);
    }
    if let Some(response) = &handshake.response {
        out.extend_from_slice(response.node_id.as_bytes());
        out.extend_from_slice(&response.signature);
        if let Some(v2) = &response.v2 {
            out.extend_from_slice(&v2.salt);
            out.extend_from_slice(&v2.genesis);
        }
    }
    out
}

#[cfg(test)]
fn take<const N: usize>(bytes: &[u8]) -> Option<([u8; N], &[u8])> {
    if bytes.len() < N {
        return None;
    }
    let (head, tail) = bytes.split_at(N);
    Some((head.try_into().ok()?, tail))
}

#[cfg(test)]
fn decode_handshake(payload: &[u8]) -> Option<NodeIdHandshake> {
    let (&flags, mut rest) = payload.split_first()?;

    let mut query = None;
    if flags & 0x01 != 0 {
        let (cookie, tail) = take::<32>(rest)?;
        query = Some(HandshakeQuery { cookie });
        rest = tail;
    }

    let mut response = None;
    if flags & 0x02 != 0 {
        let (node_id, tail) = take::<32>(rest)?;
        let (signature, tail) = take::<64>(tail)?;
        rest = tail;
        let mut v2 = None;
        if flags & 0x04 != 0 {
            let (salt, tail) = take::<32>(rest)?;
            let (genesis, tail) = take::<32>(tail)?;
            v2 = Some(HandshakeV2 { salt, genesis });
            rest = tail;
        }
        response = Some(HandshakeResponse {
            node_id: qc_18_tcp_ingress::NodeId::new(node_id),
            signature,
            v2,
        });
    }

    rest.is_empty().then_some(NodeIdHandshake {
        query,
        response,
        v2: flags & 0x10 != 0,
        bootstrap_only: flags & 0x08 != 0,
    })
}

#[cfg(test)]
fn decode(kind: u8, payload: &[u8]) -> Result<Message, DeserializeError> {
    let kind = *MessageKind::ALL
        .get(kind as usize)
        .ok_or(DeserializeError::InvalidMessageType(kind))?;
    match kind {
        MessageKind::NodeIdHandshake => decode_handshake(payload)
            .map(Message::NodeIdHandshake)
            .ok_or(DeserializeError::InvalidMessage(kind)),
        MessageKind::BulkPull => Ok(Message::BulkPull(BulkPull::default())),
        MessageKind::BulkPush => Ok(Message::BulkPush),
        MessageKind::Keepalive => Ok(Message::Keepalive(Keepalive::default())),
        MessageKind::Publish => Ok(Message::Publish(Publish {
            block: payload.to_vec(),
        })),
        MessageKind::TelemetryReq => Ok(Message::TelemetryReq(TelemetryReq)),
        other => Err(DeserializeError::InvalidMessage(other)),
    }
}

/// Pop one complete frame off the front of `buf`.
#[cfg(test)]
fn take_frame(buf: &mut Vec<u8>) -> Option<Result<Message, DeserializeError>> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    if buf.len() < HEADER_LEN + len {
        return None;
    }
    let frame: Vec<u8> = buf.drain(..HEADER_LEN + len).collect();
    Some(decode(frame[0], &frame[HEADER_LEN..]))
}

#[cfg(test)]
#[derive(Default)]
struct FrameDeserializer {
    buf: Vec<u8>,
}

#[cfg(test)]
#[async_trait]
impl MessageDeserializer for FrameDeserializer {
    async fn read(&mut self, socket: &dyn Socket) -> Result<Message, DeserializeError> {
        loop {
            if let Some(result) = take_frame(&mut self.buf) {
                return result;
            }
            let mut chunk = [0u8; 1024];
            let n = socket.read(&mut chunk).await?;
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
struct FrameCodec;

#[cfg(test)]
impl MessageCodec for FrameCodec {
    fn deserializer(&self) -> Box<dyn MessageDeserializer> {
        Box::new(FrameDeserializer::default())
    }

    fn serialize(&self, message: &Message) -> Vec<u8> {
        encode(message)
    }
}

// -----------------------------------------------------------------------------
// Node and peer
// -----------------------------------------------------------------------------

#[cfg(test)]
struct TestNode {
    listener: Arc<TcpListener>,
    authority: Arc<SynCookieAuthority>,
    bootstrap: Arc<RecordingBootstrapServer>,
    realtime: Arc<RecordingRealtimeSink>,
}

#[cfg(test)]
impl TestNode {
    async fn start(config: ListenerConfig) -> Self {
        init_tracing();

        let authority = Arc::new(SynCookieAuthority::generate(GENESIS));
        let bootstrap = RecordingBootstrapServer::new();
        let realtime = RecordingRealtimeSink::new();
        let context = Arc::new(SessionContext::new(
            config.session.clone(),
            Arc::new(FrameCodec),
            authority.clone(),
            bootstrap.clone(),
            realtime.clone(),
        ));

        let listener = TcpListener::bind(config, context).await.unwrap();
        let on_connected: OnConnected = Arc::new(|_: &Arc<Session>| true);
        listener.start(on_connected).unwrap();

        Self {
            listener,
            authority,
            bootstrap,
            realtime,
        }
    }

    fn endpoint(&self) -> SocketAddr {
        self.listener.endpoint()
    }
}

#[cfg(test)]
struct TestPeer {
    stream: TcpStream,
    buf: Vec<u8>,
}

#[cfg(test)]
impl TestPeer {
    async fn connect(endpoint: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(endpoint).await.unwrap(),
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, message: &Message) {
        self.stream.write_all(&encode(message)).await.unwrap();
    }

    /// Next message, or `None` once the node closed the connection.
    async fn recv(&mut self) -> Option<Message> {
        loop {
            if let Some(result) = take_frame(&mut self.buf) {
                return Some(result.unwrap());
            }
            let mut chunk = [0u8; 1024];
            let n = tokio::time::timeout(WAIT, self.stream.read(&mut chunk))
                .await
                .expect("peer read timed out")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Run the full node-id handshake as the initiating side.
    async fn handshake(&mut self, node: &TestNode, identity: &SynCookieAuthority) -> Option<()> {
        let query = identity.prepare_query(node.endpoint())?;
        self.send(&Message::NodeIdHandshake(NodeIdHandshake::query(query.cookie, true)))
            .await;

        let Message::NodeIdHandshake(reply) = self.recv().await? else {
            return None;
        };
        let node_id = identity
            .verify_response(reply.response.as_ref()?, node.endpoint())
            .ok()?;
        assert_eq!(node_id, node.authority.node_id());

        let response = identity.prepare_response(reply.query.as_ref()?, true).ok()?;
        self.send(&Message::NodeIdHandshake(NodeIdHandshake::response(response)))
            .await;
        Some(())
    }
}

// =============================================================================
// TEST GROUP 1: Handshake
// =============================================================================

#[cfg(test)]
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_promotes_to_realtime() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;
        let identity = SynCookieAuthority::generate(GENESIS);

        let mut peer = TestPeer::connect(node.endpoint()).await;
        peer.handshake(&node, &identity).await.unwrap();

        assert!(wait_until(WAIT, || node.listener.realtime_count() == 1).await);
        let session = node.listener.sessions().remove(0);
        assert_eq!(session.role(), ConnectionRole::Realtime);
        assert_eq!(session.remote_node_id(), Some(identity.node_id()));
        assert_eq!(node.realtime.established(), vec![session.id()]);

        peer.send(&Message::Keepalive(Keepalive::default())).await;
        peer.send(&Message::TelemetryReq(TelemetryReq)).await;

        assert!(wait_until(WAIT, || node.realtime.queued().len() == 2).await);
        assert!(session.pop_last_keepalive().is_some());
        assert!(session.last_telemetry_req().is_some());
    }

    #[tokio::test]
    async fn test_forged_response_closes_connection() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;
        let identity = SynCookieAuthority::generate(GENESIS);

        let mut peer = TestPeer::connect(node.endpoint()).await;
        let query = identity.prepare_query(node.endpoint()).unwrap();
        peer.send(&Message::NodeIdHandshake(NodeIdHandshake::query(query.cookie, false)))
            .await;
        assert!(peer.recv().await.is_some());

        // Sign a cookie the node never issued
        let forged = identity
            .prepare_response(&HandshakeQuery { cookie: [1; 32] }, false)
            .unwrap();
        peer.send(&Message::NodeIdHandshake(NodeIdHandshake::response(forged)))
            .await;

        assert!(peer.recv().await.is_none());
        assert_eq!(node.listener.realtime_count(), 0);
        assert!(wait_until(WAIT, || node.listener.stats().handshake_aborts == 1).await);
    }

    #[tokio::test]
    async fn test_handshake_aborts_when_realtime_disabled() {
        let mut config = ListenerConfig::for_testing();
        config.session.realtime_enabled = false;
        let node = TestNode::start(config).await;
        let identity = SynCookieAuthority::generate(GENESIS);

        let mut peer = TestPeer::connect(node.endpoint()).await;
        let query = identity.prepare_query(node.endpoint()).unwrap();
        peer.send(&Message::NodeIdHandshake(NodeIdHandshake::query(query.cookie, false)))
            .await;

        assert!(peer.recv().await.is_none());
    }
}

// =============================================================================
// TEST GROUP 2: Bootstrap
// =============================================================================

#[cfg(test)]
mod bootstrap_tests {
    use super::*;

    #[tokio::test]
    async fn test_bootstrap_requests_served_one_at_a_time() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;
        let mut peer = TestPeer::connect(node.endpoint()).await;

        peer.send(&Message::BulkPull(BulkPull::default())).await;
        peer.send(&Message::BulkPush).await;

        assert!(wait_until(WAIT, || node.bootstrap.requests().len() == 1).await);
        assert_eq!(node.listener.bootstrap_count(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(node.bootstrap.requests().len(), 1);

        node.bootstrap.resume_all();
        assert!(wait_until(WAIT, || node.bootstrap.requests().len() == 2).await);
        assert_eq!(node.bootstrap.requests()[1].1, Message::BulkPush);
    }

    #[tokio::test]
    async fn test_bootstrap_refused_when_disallowed() {
        let config = ListenerConfig {
            allow_bootstrap: false,
            ..ListenerConfig::for_testing()
        };
        let node = TestNode::start(config).await;
        let mut peer = TestPeer::connect(node.endpoint()).await;

        peer.send(&Message::BulkPull(BulkPull::default())).await;

        assert!(peer.recv().await.is_none());
        assert!(node.bootstrap.requests().is_empty());
    }
}

// =============================================================================
// TEST GROUP 3: Admission
// =============================================================================

#[cfg(test)]
mod admission_tests {
    use super::*;

    #[tokio::test]
    async fn test_third_connection_from_same_ip_is_closed() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;

        let _first = TestPeer::connect(node.endpoint()).await;
        assert!(wait_until(WAIT, || node.listener.connection_count() == 1).await);
        let _second = TestPeer::connect(node.endpoint()).await;
        assert!(wait_until(WAIT, || node.listener.connection_count() == 2).await);

        let mut third = TestPeer::connect(node.endpoint()).await;
        assert!(third.recv().await.is_none());

        assert_eq!(node.listener.connection_count(), 2);
        assert_eq!(node.listener.stats().rejected_per_ip, 1);
    }

    #[tokio::test]
    async fn test_slot_freed_after_peer_disconnects() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;

        let first = TestPeer::connect(node.endpoint()).await;
        let _second = TestPeer::connect(node.endpoint()).await;
        assert!(wait_until(WAIT, || node.listener.connection_count() == 2).await);

        drop(first);
        assert!(
            wait_until(WAIT, || {
                node.listener.evict_dead_connections();
                node.listener.connection_count() == 1
            })
            .await
        );

        let _third = TestPeer::connect(node.endpoint()).await;
        assert!(wait_until(WAIT, || node.listener.connection_count() == 2).await);
        assert_eq!(node.listener.stats().rejected(), 0);
    }
}

// =============================================================================
// TEST GROUP 4: Shutdown
// =============================================================================

#[cfg(test)]
mod shutdown_tests {
    use super::*;

    #[tokio::test]
    async fn test_realtime_message_before_handshake_closes_connection() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;
        let mut peer = TestPeer::connect(node.endpoint()).await;

        peer.send(&Message::Publish(Publish { block: vec![7; 16] }))
            .await;

        assert!(peer.recv().await.is_none());
        assert!(node.realtime.queued().is_empty());
    }

    #[tokio::test]
    async fn test_stop_closes_every_connection() {
        let node = TestNode::start(ListenerConfig::for_testing()).await;
        let identity = SynCookieAuthority::generate(GENESIS);

        let mut realtime = TestPeer::connect(node.endpoint()).await;
        realtime.handshake(&node, &identity).await.unwrap();
        let mut idle = TestPeer::connect(node.endpoint()).await;
        assert!(wait_until(WAIT, || node.listener.connection_count() == 2).await);
        assert!(wait_until(WAIT, || node.listener.realtime_count() == 1).await);

        node.listener.stop();
        node.listener.stop();

        assert!(realtime.recv().await.is_none());
        assert!(idle.recv().await.is_none());
        assert_eq!(node.listener.connection_count(), 0);
        assert_eq!(node.listener.realtime_count(), 0);
    }
}
