//! # Service Layer
//!
//! Wires the domain rules to the ports:
//! - [`TcpListener`]: accept loop, admission, weak session registry
//! - [`Session`]: per-socket receive loop and role state machine

pub mod admission;
pub mod dispatch;
pub mod listener;
pub mod session;
pub mod stats;

pub use admission::AddressRegistry;
pub use dispatch::{route, Route};
pub use listener::{OnConnected, TcpListener};
pub use session::{ProcessResult, ResumeHandle, Session};
pub use stats::{IngressMetrics, IngressStats, RoleCounters};

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::ports::{BootstrapServer, HandshakeAuthority, MessageCodec, RealtimeSink};

/// Collaborators and shared state handed to every session.
pub struct SessionContext {
    /// Per-session policy.
    pub config: SessionConfig,
    /// Wire codec.
    pub codec: Arc<dyn MessageCodec>,
    /// Node-id proofs.
    pub authority: Arc<dyn HandshakeAuthority>,
    /// Bootstrap request server.
    pub bootstrap: Arc<dyn BootstrapServer>,
    /// Realtime message consumer.
    pub realtime: Arc<dyn RealtimeSink>,
    /// Live sessions per role.
    pub counters: Arc<RoleCounters>,
    /// Monotonic counters.
    pub metrics: Arc<IngressMetrics>,
}

impl SessionContext {
    /// Context with fresh counters.
    pub fn new(
        config: SessionConfig,
        codec: Arc<dyn MessageCodec>,
        authority: Arc<dyn HandshakeAuthority>,
        bootstrap: Arc<dyn BootstrapServer>,
        realtime: Arc<dyn RealtimeSink>,
    ) -> Self {
        Self {
            config,
            codec,
            authority,
            bootstrap,
            realtime,
            counters: Arc::new(RoleCounters::new()),
            metrics: Arc::new(IngressMetrics::new()),
        }
    }
}

/// Resolves once `true` is published on `stop`, or the sender is gone.
pub(crate) async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}
