//! # Connection Session
//!
//! One accepted socket from admission to close.
//!
//! ```text
//!            ┌──────────── handshake (query / response) ───────────┐
//!            │                                                      ▼
//!  Undefined ──── verified response ────▶ Realtime   (handshake ignored)
//!            │
//!            └──── bulk_pull / bulk_push / frontier_req ─▶ Bootstrap
//! ```
//!
//! The receive loop keeps exactly one read outstanding. Each message is
//! processed to a [`ProcessResult`] before the next read is issued; a
//! `Pause` parks the loop until the bootstrap server resumes it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::dispatch::{route, Route};
use super::{stop_requested, SessionContext};
use crate::domain::{
    AbortReason, ConnectionRole, DeserializeError, HandshakeError, HandshakeQuery,
    HandshakeStatus, Keepalive, Message, NodeId, NodeIdHandshake, RoleCell, SessionId,
};
use crate::ports::{MessageDeserializer, Socket};

/// Outcome of processing one message.
#[derive(Debug)]
pub enum ProcessResult {
    /// Stop the session.
    Abort(AbortReason),
    /// Issue the next read.
    Progress,
    /// Wait for the bootstrap server before reading again.
    Pause(oneshot::Receiver<()>),
}

/// Completion signal handed to the bootstrap server with each request.
///
/// Dropping the handle without calling [`resume`](Self::resume) ends the
/// session.
#[derive(Debug)]
pub struct ResumeHandle(oneshot::Sender<()>);

impl ResumeHandle {
    fn channel() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Let the session read its next message.
    pub fn resume(self) {
        let _ = self.0.send(());
    }
}

/// Per-socket session.
pub struct Session {
    id: SessionId,
    socket: Arc<dyn Socket>,
    remote_endpoint: SocketAddr,
    remote_node_id: OnceLock<NodeId>,
    role: RoleCell,
    allow_bootstrap: bool,
    started: AtomicBool,
    stopped: AtomicBool,
    handshake_received: AtomicBool,
    // Serialises role promotion against stop so counters stay balanced.
    transition: Mutex<()>,
    last_keepalive: Mutex<Option<Keepalive>>,
    last_telemetry_req: Mutex<Option<Instant>>,
    last_activity: Mutex<Instant>,
    context: Arc<SessionContext>,
    stop_tx: watch::Sender<bool>,
}

impl Session {
    /// Create a session for an admitted socket. Nothing is read until
    /// [`start`](Self::start).
    pub fn new(
        id: SessionId,
        socket: Arc<dyn Socket>,
        context: Arc<SessionContext>,
        allow_bootstrap: bool,
    ) -> Arc<Self> {
        let remote_endpoint = socket.remote_endpoint();
        let (stop_tx, _) = watch::channel(false);
        Arc::new(Self {
            id,
            socket,
            remote_endpoint,
            remote_node_id: OnceLock::new(),
            role: RoleCell::new(),
            allow_bootstrap,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            handshake_received: AtomicBool::new(false),
            transition: Mutex::new(()),
            last_keepalive: Mutex::new(None),
            last_telemetry_req: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            context,
            stop_tx,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Registry identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Peer address captured at accept time; survives socket close.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    /// Verified peer identity, once the handshake succeeded.
    pub fn remote_node_id(&self) -> Option<NodeId> {
        self.remote_node_id.get().copied()
    }

    /// Current role.
    pub fn role(&self) -> ConnectionRole {
        self.role.get()
    }

    /// Underlying socket, for collaborators that answer on it.
    pub fn socket(&self) -> &Arc<dyn Socket> {
        &self.socket
    }

    /// True once stopped.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True once a handshake was processed.
    pub fn handshake_received(&self) -> bool {
        self.handshake_received.load(Ordering::Acquire)
    }

    /// Whether this session may become a bootstrap connection.
    pub fn allow_bootstrap(&self) -> bool {
        self.allow_bootstrap
    }

    /// When the last telemetry request arrived.
    pub fn last_telemetry_req(&self) -> Option<Instant> {
        *self.last_telemetry_req.lock()
    }

    /// Time since the last message or decode error.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the receive loop. Later calls do nothing.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) || self.is_stopped() {
            return;
        }
        trace!(session_id = %self.id, remote = %self.remote_endpoint, "Session started");
        let deserializer = self.context.codec.deserializer();
        tokio::spawn(Arc::clone(self).run(deserializer));
    }

    /// Stop the session and close its socket. Idempotent.
    pub fn stop(&self) {
        if self.shutdown() {
            debug!(session_id = %self.id, remote = %self.remote_endpoint, "Session stopped");
        }
    }

    /// Idle timer expiry.
    pub fn timeout(&self) {
        if self.shutdown() {
            self.context.metrics.record_timeout();
            debug!(
                session_id = %self.id,
                remote = %self.remote_endpoint,
                role = %self.role(),
                "Session timed out"
            );
        }
    }

    fn shutdown(&self) -> bool {
        let _guard = self.transition.lock();
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.socket.close();
        self.context.counters.release(self.role.get());
        self.stop_tx.send_replace(true);
        true
    }

    async fn run(self: Arc<Self>, mut deserializer: Box<dyn MessageDeserializer>) {
        let mut stop = self.stop_tx.subscribe();

        let reason = loop {
            match self.receive_message(deserializer.as_mut(), &mut stop).await {
                ProcessResult::Progress => {}
                ProcessResult::Pause(resumed) => {
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut stop) => break AbortReason::Stopped,
                        result = resumed => {
                            if result.is_err() {
                                break AbortReason::BootstrapFinished;
                            }
                        }
                    }
                }
                ProcessResult::Abort(reason) => break reason,
            }
        };

        if reason != AbortReason::Stopped && !self.is_stopped() {
            self.context.metrics.record_aborted_session();
        }
        debug!(
            session_id = %self.id,
            remote = %self.remote_endpoint,
            role = %self.role(),
            reason = %reason,
            "Session ended"
        );
        self.shutdown();
    }

    /// Wait for the next message, or for stop.
    pub async fn receive_message(
        self: &Arc<Self>,
        deserializer: &mut dyn MessageDeserializer,
        stop: &mut watch::Receiver<bool>,
    ) -> ProcessResult {
        if self.is_stopped() {
            return ProcessResult::Abort(AbortReason::Stopped);
        }
        let result = tokio::select! {
            biased;
            _ = stop_requested(stop) => return ProcessResult::Abort(AbortReason::Stopped),
            result = deserializer.read(self.socket.as_ref()) => result,
        };
        self.received_message(result).await
    }

    /// Handle a deserializer outcome.
    pub async fn received_message(
        self: &Arc<Self>,
        result: Result<Message, DeserializeError>,
    ) -> ProcessResult {
        match result {
            Ok(message) => {
                self.touch();
                self.process_message(message).await
            }
            Err(err) if err.is_recoverable() => {
                self.touch();
                self.context.metrics.record_recoverable_error();
                trace!(session_id = %self.id, error = %err, "Skipping message");
                ProcessResult::Progress
            }
            Err(err) => ProcessResult::Abort(AbortReason::Receive(err)),
        }
    }

    /// Route one message according to the current role.
    pub async fn process_message(self: &Arc<Self>, message: Message) -> ProcessResult {
        if self.is_stopped() {
            return ProcessResult::Abort(AbortReason::Stopped);
        }

        let role = self.role();
        let kind = message.kind();
        match route(role, kind) {
            Route::Handshake => {
                let Message::NodeIdHandshake(handshake) = &message else {
                    return ProcessResult::Abort(AbortReason::UnexpectedMessage { role, kind });
                };
                match self.process_handshake(handshake).await {
                    Ok(HandshakeStatus::Handshake) => ProcessResult::Progress,
                    Ok(HandshakeStatus::Realtime) => {
                        if self.to_realtime_connection() {
                            self.context.realtime.connection_established(self);
                            ProcessResult::Progress
                        } else {
                            ProcessResult::Abort(AbortReason::PromotionRefused(
                                ConnectionRole::Realtime,
                            ))
                        }
                    }
                    Ok(HandshakeStatus::Bootstrap) => {
                        if self.to_bootstrap_connection() {
                            ProcessResult::Progress
                        } else {
                            ProcessResult::Abort(AbortReason::PromotionRefused(
                                ConnectionRole::Bootstrap,
                            ))
                        }
                    }
                    Err(reason) => {
                        self.context.metrics.record_handshake_abort();
                        ProcessResult::Abort(reason)
                    }
                }
            }
            Route::PromoteBootstrap => {
                if self.to_bootstrap_connection() {
                    self.forward_bootstrap(message)
                } else {
                    ProcessResult::Abort(AbortReason::PromotionRefused(ConnectionRole::Bootstrap))
                }
            }
            Route::Bootstrap => self.forward_bootstrap(message),
            Route::Realtime => {
                self.queue_realtime(message);
                ProcessResult::Progress
            }
            Route::Ignore => {
                trace!(session_id = %self.id, kind = %kind, "Ignoring message");
                ProcessResult::Progress
            }
            Route::Reject => ProcessResult::Abort(AbortReason::UnexpectedMessage { role, kind }),
        }
    }

    // =========================================================================
    // Handshake
    // =========================================================================

    /// Run one handshake message.
    ///
    /// A query is answered before the response half is looked at, so a
    /// message with a valid query and a bad response still gets our
    /// response written before the session aborts.
    pub async fn process_handshake(
        &self,
        message: &NodeIdHandshake,
    ) -> Result<HandshakeStatus, AbortReason> {
        self.context.metrics.record_handshake();

        if !self.context.config.realtime_enabled {
            return Err(AbortReason::RealtimeDisabled);
        }
        if message.is_empty() {
            return Err(HandshakeError::Empty.into());
        }
        if message.query.is_some() && self.handshake_received.swap(true, Ordering::AcqRel) {
            return Err(AbortReason::DuplicateHandshake);
        }
        self.handshake_received.store(true, Ordering::Release);

        if let Some(query) = &message.query {
            self.send_handshake_response(query, message.v2).await?;
        }

        let Some(response) = &message.response else {
            debug!(session_id = %self.id, remote = %self.remote_endpoint, "Handshake query answered");
            return Ok(HandshakeStatus::Handshake);
        };

        let node_id = self
            .context
            .authority
            .verify_response(response, self.remote_endpoint)?;
        if self.remote_node_id.set(node_id).is_err() {
            return Err(AbortReason::DuplicateHandshake);
        }
        debug!(
            session_id = %self.id,
            remote = %self.remote_endpoint,
            node_id = %node_id.short(),
            "Handshake verified"
        );

        Ok(if message.bootstrap_only {
            HandshakeStatus::Bootstrap
        } else {
            HandshakeStatus::Realtime
        })
    }

    async fn send_handshake_response(
        &self,
        query: &HandshakeQuery,
        v2: bool,
    ) -> Result<(), AbortReason> {
        let authority = &self.context.authority;
        let response = authority.prepare_response(query, v2)?;
        let own_query = authority.prepare_query(self.remote_endpoint);

        let handshake = NodeIdHandshake {
            query: own_query,
            response: Some(response),
            v2,
            bootstrap_only: false,
        };
        let bytes = self
            .context
            .codec
            .serialize(&Message::NodeIdHandshake(handshake));

        self.socket
            .write(&bytes)
            .await
            .map_err(AbortReason::ResponseWrite)?;
        self.context.metrics.record_handshake_response();
        Ok(())
    }

    // =========================================================================
    // Role transitions
    // =========================================================================

    /// Become a bootstrap connection.
    ///
    /// Fails when bootstrap is not allowed here, the bootstrap ceiling is
    /// reached, or the session is already classified.
    pub fn to_bootstrap_connection(&self) -> bool {
        if !self.allow_bootstrap || !self.context.config.bootstrap_listener_enabled {
            return false;
        }

        let _guard = self.transition.lock();
        if self.is_stopped() || self.role.get() != ConnectionRole::Undefined {
            return false;
        }
        let counters = &self.context.counters;
        if !counters.try_acquire_bootstrap(self.context.config.bootstrap_connections_max) {
            debug!(
                session_id = %self.id,
                remote = %self.remote_endpoint,
                "Bootstrap connection limit reached"
            );
            return false;
        }
        if !self.role.promote(ConnectionRole::Bootstrap) {
            counters.release(ConnectionRole::Bootstrap);
            return false;
        }

        self.context.metrics.record_bootstrap_promotion();
        debug!(session_id = %self.id, remote = %self.remote_endpoint, "Switched to bootstrap");
        true
    }

    /// Become a realtime connection.
    pub fn to_realtime_connection(&self) -> bool {
        if !self.context.config.realtime_enabled {
            return false;
        }

        let _guard = self.transition.lock();
        if self.is_stopped() || !self.role.promote(ConnectionRole::Realtime) {
            return false;
        }
        self.context.counters.acquire_realtime();

        self.context.metrics.record_realtime_promotion();
        debug!(session_id = %self.id, remote = %self.remote_endpoint, "Switched to realtime");
        true
    }

    // =========================================================================
    // Forwarding
    // =========================================================================

    fn forward_bootstrap(self: &Arc<Self>, message: Message) -> ProcessResult {
        let (resume, resumed) = ResumeHandle::channel();
        self.context.metrics.record_bootstrap_forwarded();
        self.context
            .bootstrap
            .serve(Arc::clone(self), message, resume);
        ProcessResult::Pause(resumed)
    }

    /// Hand a realtime message to the sink.
    pub fn queue_realtime(self: &Arc<Self>, message: Message) {
        if self.is_stopped() {
            return;
        }
        match &message {
            Message::Keepalive(keepalive) => self.set_last_keepalive(keepalive.clone()),
            Message::TelemetryReq(_) => *self.last_telemetry_req.lock() = Some(Instant::now()),
            _ => {}
        }
        self.context.metrics.record_realtime_forwarded();
        self.context.realtime.queue(self, message);
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Remember the latest keepalive.
    pub fn set_last_keepalive(&self, message: Keepalive) {
        *self.last_keepalive.lock() = Some(message);
    }

    /// Take the latest keepalive, leaving none.
    pub fn pop_last_keepalive(&self) -> Option<Keepalive> {
        self.last_keepalive.lock().take()
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_endpoint", &self.remote_endpoint)
            .field("role", &self.role())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
