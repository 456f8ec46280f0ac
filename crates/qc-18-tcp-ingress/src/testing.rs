//! Centralized Testing Utilities
//!
//! In-memory collaborators for driving sessions and the listener without a
//! network. Available with the `test-utils` feature flag.

use std::collections::VecDeque;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::config::SessionConfig;
use crate::domain::{
    DeserializeError, HandshakeError, HandshakeQuery, HandshakeResponse, Message, NodeId,
    SessionId, TransportError,
};
use crate::ports::{
    BootstrapServer, HandshakeAuthority, MessageCodec, MessageDeserializer, RealtimeSink, Socket,
};
use crate::service::{ResumeHandle, Session, SessionContext};

// =============================================================================
// Socket
// =============================================================================

/// Socket that records writes. Reads block until closed.
pub struct MockSocket {
    remote: SocketAddr,
    closed: watch::Sender<bool>,
    written: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MockSocket {
    /// Socket from `remote`.
    pub fn new(remote: SocketAddr) -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            remote,
            closed,
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Socket from `ip` on an arbitrary port.
    ///
    /// # Panics
    ///
    /// If `ip` does not parse.
    pub fn from_ip(ip: &str) -> Arc<Self> {
        let ip: IpAddr = ip.parse().expect("valid IP literal");
        Self::new(SocketAddr::new(ip, 24000))
    }

    /// Every buffer written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    /// Make later writes fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Socket for MockSocket {
    fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    async fn read(&self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        Err(TransportError::Closed)
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.is_closed() || self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.written.lock().push(bytes.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Sender side of a scripted deserializer.
#[derive(Clone)]
pub struct MessageFeed(mpsc::UnboundedSender<Result<Message, DeserializeError>>);

impl MessageFeed {
    /// Deliver a message.
    pub fn send(&self, message: Message) {
        let _ = self.0.send(Ok(message));
    }

    /// Deliver a decode error.
    pub fn fail(&self, error: DeserializeError) {
        let _ = self.0.send(Err(error));
    }
}

/// Deserializer yielding whatever its [`MessageFeed`] sends. Ends with
/// [`TransportError::Closed`] once the feed is dropped.
pub struct ScriptedDeserializer(mpsc::UnboundedReceiver<Result<Message, DeserializeError>>);

#[async_trait]
impl MessageDeserializer for ScriptedDeserializer {
    async fn read(&mut self, _socket: &dyn Socket) -> Result<Message, DeserializeError> {
        match self.0.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed.into()),
        }
    }
}

/// Codec handing out scripted deserializers in creation order and
/// recording every serialized message.
#[derive(Default)]
pub struct MockCodec {
    scripts: Mutex<VecDeque<ScriptedDeserializer>>,
    // Keeps feeds alive for sessions created without a script.
    idle_feeds: Mutex<Vec<MessageFeed>>,
    serialized: Mutex<Vec<Message>>,
}

impl MockCodec {
    /// Empty codec.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next session's incoming messages.
    pub fn script(&self) -> MessageFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(ScriptedDeserializer(rx));
        MessageFeed(tx)
    }

    /// Messages serialized so far.
    pub fn serialized(&self) -> Vec<Message> {
        self.serialized.lock().clone()
    }
}

impl MessageCodec for MockCodec {
    fn deserializer(&self) -> Box<dyn MessageDeserializer> {
        if let Some(script) = self.scripts.lock().pop_front() {
            return Box::new(script);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.idle_feeds.lock().push(MessageFeed(tx));
        Box::new(ScriptedDeserializer(rx))
    }

    fn serialize(&self, message: &Message) -> Vec<u8> {
        self.serialized.lock().push(message.clone());
        message.kind().as_str().as_bytes().to_vec()
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Signature marking a response [`StaticAuthority`] rejects.
pub const BAD_SIGNATURE: [u8; 64] = [0xFF; 64];

/// Authority with fixed answers.
///
/// Responses verify unless signed with [`BAD_SIGNATURE`]; an all-zero
/// cookie is a malformed query.
pub struct StaticAuthority {
    node_id: NodeId,
    cookie: [u8; 32],
}

impl StaticAuthority {
    /// Authority for `node_id`.
    pub fn new(node_id: NodeId) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            cookie: [7; 32],
        })
    }

    /// Response the authority accepts.
    pub fn valid_response(node_id: NodeId) -> HandshakeResponse {
        HandshakeResponse {
            node_id,
            signature: [1; 64],
            v2: None,
        }
    }

    /// Response the authority rejects.
    pub fn invalid_response(node_id: NodeId) -> HandshakeResponse {
        HandshakeResponse {
            node_id,
            signature: BAD_SIGNATURE,
            v2: None,
        }
    }
}

impl HandshakeAuthority for StaticAuthority {
    fn prepare_query(&self, _remote: SocketAddr) -> Option<HandshakeQuery> {
        Some(HandshakeQuery {
            cookie: self.cookie,
        })
    }

    fn prepare_response(
        &self,
        query: &HandshakeQuery,
        _v2: bool,
    ) -> Result<HandshakeResponse, HandshakeError> {
        if query.cookie == [0; 32] {
            return Err(HandshakeError::MalformedQuery);
        }
        Ok(Self::valid_response(self.node_id))
    }

    fn verify_response(
        &self,
        response: &HandshakeResponse,
        _remote: SocketAddr,
    ) -> Result<NodeId, HandshakeError> {
        if response.signature == BAD_SIGNATURE {
            return Err(HandshakeError::InvalidSignature);
        }
        if response.node_id == self.node_id {
            return Err(HandshakeError::SelfConnection);
        }
        Ok(response.node_id)
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Bootstrap server that parks every request until told to resume.
#[derive(Default)]
pub struct RecordingBootstrapServer {
    requests: Mutex<Vec<(SessionId, Message)>>,
    pending: Mutex<Vec<ResumeHandle>>,
    // Held so a session stays referenced while its request is served.
    sessions: Mutex<Vec<Arc<Session>>>,
}

impl RecordingBootstrapServer {
    /// Empty server.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<(SessionId, Message)> {
        self.requests.lock().clone()
    }

    /// Resume every parked session.
    pub fn resume_all(&self) -> usize {
        let pending: Vec<ResumeHandle> = self.pending.lock().drain(..).collect();
        let count = pending.len();
        for handle in pending {
            handle.resume();
        }
        self.sessions.lock().clear();
        count
    }

    /// Release every parked session without resuming it.
    pub fn finish_all(&self) {
        self.pending.lock().clear();
        self.sessions.lock().clear();
    }
}

impl BootstrapServer for RecordingBootstrapServer {
    fn serve(&self, session: Arc<Session>, request: Message, resume: ResumeHandle) {
        self.requests.lock().push((session.id(), request));
        self.pending.lock().push(resume);
        self.sessions.lock().push(session);
    }
}

/// Realtime sink that records everything it is given.
#[derive(Default)]
pub struct RecordingRealtimeSink {
    established: Mutex<Vec<SessionId>>,
    queued: Mutex<Vec<(SessionId, Message)>>,
}

impl RecordingRealtimeSink {
    /// Empty sink.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sessions announced as realtime.
    pub fn established(&self) -> Vec<SessionId> {
        self.established.lock().clone()
    }

    /// Messages queued so far.
    pub fn queued(&self) -> Vec<(SessionId, Message)> {
        self.queued.lock().clone()
    }
}

impl RealtimeSink for RecordingRealtimeSink {
    fn connection_established(&self, session: &Arc<Session>) {
        self.established.lock().push(session.id());
    }

    fn queue(&self, session: &Arc<Session>, message: Message) {
        self.queued.lock().push((session.id(), message));
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Node id used by [`TestHarness`] for itself.
pub const LOCAL_NODE_ID: NodeId = NodeId::new([0xAA; 32]);

/// Node id used by tests for the remote peer.
pub const PEER_NODE_ID: NodeId = NodeId::new([0xBB; 32]);

/// A [`SessionContext`] wired to recording mocks.
pub struct TestHarness {
    /// Context to hand to sessions or the listener.
    pub context: Arc<SessionContext>,
    /// Codec behind the context.
    pub codec: Arc<MockCodec>,
    /// Bootstrap server behind the context.
    pub bootstrap: Arc<RecordingBootstrapServer>,
    /// Realtime sink behind the context.
    pub realtime: Arc<RecordingRealtimeSink>,
}

impl TestHarness {
    /// Harness with default session policy.
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    /// Harness with the given session policy.
    pub fn with_config(config: SessionConfig) -> Self {
        Self::with_authority(config, StaticAuthority::new(LOCAL_NODE_ID))
    }

    /// Harness proving identity through `authority` instead of the static mock.
    pub fn with_authority(config: SessionConfig, authority: Arc<dyn HandshakeAuthority>) -> Self {
        let codec = MockCodec::new();
        let bootstrap = RecordingBootstrapServer::new();
        let realtime = RecordingRealtimeSink::new();
        let context = Arc::new(SessionContext::new(
            config,
            codec.clone(),
            authority,
            bootstrap.clone(),
            realtime.clone(),
        ));
        Self {
            context,
            codec,
            bootstrap,
            realtime,
        }
    }

    /// Unstarted session over `socket`.
    pub fn session(&self, id: u64, socket: Arc<MockSocket>, allow_bootstrap: bool) -> Arc<Session> {
        Session::new(
            SessionId::new(id),
            socket,
            Arc::clone(&self.context),
            allow_bootstrap,
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Run `future` with a timeout, panicking if it does not finish.
///
/// # Panics
///
/// If `future` takes longer than `timeout`.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation timed out")
}
