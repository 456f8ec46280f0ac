//! # Connection Acceptor
//!
//! Owns the listening socket and the registry of live sessions.
//!
//! ```text
//! accept ─▶ inbound ceiling ─▶ per-IP ─▶ per-subnet ─▶ register ─▶ Session::start
//!              │ reject            │ reject    │ reject
//!              └───────────────────┴───────────┴──▶ close socket, no session
//! ```
//!
//! All accepts run on one task, so the check-then-register sequence never
//! interleaves. The registry lock exists for readers on other tasks
//! (diagnostics, maintenance).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::admission::AddressRegistry;
use super::session::Session;
use super::stats::IngressStats;
use super::{stop_requested, SessionContext};
use crate::adapters::TokioSocket;
use crate::config::ListenerConfig;
use crate::domain::{ConnectionRole, ListenerError, RejectReason, SessionId, TransportError};
use crate::ports::{ConnectionDiagnostics, Socket};

/// Callback run for every admitted session before its receive loop starts.
///
/// Returns whether the listener should keep accepting.
pub type OnConnected = Arc<dyn Fn(&Arc<Session>) -> bool + Send + Sync>;

#[derive(Default)]
struct Registry {
    connections: HashMap<SessionId, Weak<Session>>,
    addresses: AddressRegistry,
}

/// Inbound TCP listener.
pub struct TcpListener {
    config: ListenerConfig,
    context: Arc<SessionContext>,
    endpoint: SocketAddr,
    acceptor: Mutex<Option<tokio::net::TcpListener>>,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    on: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl TcpListener {
    /// Bind the listening socket. Nothing is accepted until
    /// [`start`](Self::start).
    pub async fn bind(
        config: ListenerConfig,
        context: Arc<SessionContext>,
    ) -> Result<Arc<Self>, ListenerError> {
        let addr = config.bind_addr();
        let bind_error = |source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let acceptor = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(bind_error)?;
        let endpoint = acceptor.local_addr().map_err(bind_error)?;
        let (stop_tx, _) = watch::channel(false);

        debug!(endpoint = %endpoint, "TCP listener bound");

        Ok(Arc::new(Self {
            config,
            context,
            endpoint,
            acceptor: Mutex::new(Some(acceptor)),
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            on: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_tx,
        }))
    }

    /// Begin accepting connections.
    pub fn start(self: &Arc<Self>, on_connected: OnConnected) -> Result<(), ListenerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ListenerError::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ListenerError::AlreadyStarted);
        }
        let acceptor = self
            .acceptor
            .lock()
            .take()
            .ok_or(ListenerError::Stopped)?;

        self.on.store(true, Ordering::Release);
        info!(endpoint = %self.endpoint, "TCP listener started");

        tokio::spawn(Arc::clone(self).run_accept_loop(acceptor, on_connected));
        Ok(())
    }

    /// Stop accepting and stop every live session. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.on.store(false, Ordering::Release);
        self.stop_tx.send_replace(true);
        self.acceptor.lock().take();

        let sessions: Vec<Arc<Session>> = {
            let mut registry = self.registry.lock();
            registry.addresses.clear();
            registry
                .connections
                .drain()
                .filter_map(|(_, session)| session.upgrade())
                .collect()
        };
        for session in &sessions {
            session.stop();
        }

        info!(
            endpoint = %self.endpoint,
            sessions = sessions.len(),
            "TCP listener stopped"
        );
    }

    /// True between `start` and `stop`.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    /// Bound local address.
    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Listener configuration.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Registered sessions, including dead entries not yet evicted.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Live registered sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry
            .lock()
            .connections
            .values()
            .filter_map(Weak::upgrade)
            .filter(|session| !session.is_stopped())
            .collect()
    }

    async fn run_accept_loop(
        self: Arc<Self>,
        acceptor: tokio::net::TcpListener,
        on_connected: OnConnected,
    ) {
        let mut stop = self.stop_tx.subscribe();
        let requeue_delay = self.config.requeue_delay();

        while self.is_on() {
            self.evict_dead_connections();

            if self.connection_count() >= self.config.max_inbound_connections {
                debug!(
                    endpoint = %self.endpoint,
                    max = self.config.max_inbound_connections,
                    "Inbound connection ceiling reached, delaying accept"
                );
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop) => break,
                    _ = tokio::time::sleep(requeue_delay) => continue,
                }
            }

            let accepted = tokio::select! {
                biased;
                _ = stop_requested(&mut stop) => break,
                accepted = acceptor.accept() => accepted,
            };

            let result = accepted
                .map(|(stream, remote)| Arc::new(TokioSocket::new(stream, remote)) as Arc<dyn Socket>)
                .map_err(TransportError::from);
            let exhausted = matches!(&result, Err(err) if err.is_descriptor_exhaustion());

            if !self.accept_action(result, on_connected.as_ref()) {
                break;
            }

            if exhausted {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop) => break,
                    _ = tokio::time::sleep(requeue_delay) => {}
                }
            }
        }

        debug!(endpoint = %self.endpoint, "Accept loop exited");
    }

    /// Admission pipeline for one raw accept.
    ///
    /// Returns whether to keep accepting.
    pub fn accept_action(
        self: &Arc<Self>,
        result: Result<Arc<dyn Socket>, TransportError>,
        on_connected: &(dyn Fn(&Arc<Session>) -> bool + Send + Sync),
    ) -> bool {
        let metrics = &self.context.metrics;

        let socket = match result {
            Ok(socket) => socket,
            Err(err) => {
                metrics.record_accept_failure();
                warn!(endpoint = %self.endpoint, error = %err, "Unable to accept connection");
                return self.is_on();
            }
        };

        if !self.is_on() {
            self.reject(socket, RejectReason::Stopped);
            return false;
        }

        let remote = socket.remote_endpoint();
        let admitted = {
            let mut registry = self.registry.lock();
            let connection_count = registry.connections.len();
            // `stop` clears `on` before draining under this lock.
            let checked = if self.is_on() {
                registry
                    .addresses
                    .check(&self.config, connection_count, remote.ip())
            } else {
                Err(RejectReason::Stopped)
            };
            match checked {
                Ok(()) => {
                    registry.addresses.register(&socket);
                    let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let session = Session::new(
                        id,
                        socket,
                        Arc::clone(&self.context),
                        self.config.allow_bootstrap,
                    );
                    registry.connections.insert(id, Arc::downgrade(&session));
                    Ok(session)
                }
                Err(reason) => Err((socket, reason)),
            }
        };

        let session = match admitted {
            Ok(session) => session,
            Err((socket, reason)) => {
                self.reject(socket, reason);
                return reason != RejectReason::Stopped;
            }
        };

        metrics.record_accepted();
        debug!(session_id = %session.id(), remote = %remote, "Connection accepted");

        let keep_accepting = on_connected(&session);
        session.start();
        keep_accepting && self.is_on()
    }

    fn reject(&self, socket: Arc<dyn Socket>, reason: RejectReason) {
        self.context.metrics.record_rejection(reason);
        warn!(
            remote = %socket.remote_endpoint(),
            reason = %reason,
            "Rejected inbound connection"
        );
        socket.close();
    }

    /// Forget sessions that were dropped or stopped, and their addresses.
    pub fn evict_dead_connections(&self) {
        let mut registry = self.registry.lock();
        let before = registry.connections.len();
        registry
            .connections
            .retain(|_, session| session.upgrade().is_some_and(|s| !s.is_stopped()));
        registry.addresses.evict_closed();

        let evicted = before - registry.connections.len();
        if evicted > 0 {
            debug!(evicted, remaining = registry.connections.len(), "Evicted dead connections");
        }
    }

    /// Time out idle sessions that have not become bootstrap connections.
    ///
    /// Returns how many were timed out. A zero idle timeout disables this.
    pub fn timeout_idle_sessions(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        if idle_timeout.is_zero() {
            return 0;
        }

        let mut timed_out = 0;
        for session in self.sessions() {
            if session.role() != ConnectionRole::Bootstrap && session.idle_for() >= idle_timeout {
                session.timeout();
                timed_out += 1;
            }
        }
        timed_out
    }

    /// Drop handshake cookies nobody answered within the cookie lifetime.
    pub fn purge_cookies(&self) -> usize {
        self.context
            .authority
            .purge(self.config.cookie_lifetime())
    }

    /// Spawn the periodic maintenance task: idle timeouts, eviction and
    /// cookie purge. It ends with the listener.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let listener = Arc::clone(self);
        tokio::spawn(async move {
            let mut stop = listener.stop_tx.subscribe();
            let mut ticker = tokio::time::interval(listener.config.maintenance_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut stop) => break,
                    _ = ticker.tick() => {}
                }
                let timed_out = listener.timeout_idle_sessions();
                if timed_out > 0 {
                    debug!(timed_out, "Timed out idle sessions");
                }
                listener.evict_dead_connections();
                listener.purge_cookies();
            }
        })
    }
}

impl ConnectionDiagnostics for TcpListener {
    fn connection_count(&self) -> usize {
        TcpListener::connection_count(self)
    }

    fn bootstrap_count(&self) -> usize {
        self.context.counters.bootstrap()
    }

    fn realtime_count(&self) -> usize {
        self.context.counters.realtime()
    }

    fn stats(&self) -> IngressStats {
        self.context.metrics.snapshot()
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.stop();
    }
}
