//! Per-role message routing.
//!
//! | role      | handshake | bootstrap-family | realtime-family |
//! |-----------|-----------|------------------|-----------------|
//! | undefined | handshake | promote          | reject          |
//! | bootstrap | reject    | bootstrap        | reject          |
//! | realtime  | ignore    | reject           | realtime        |
//!
//! `frontier_req` belongs to both families; the session's role decides
//! which one applies.

use crate::domain::{ConnectionRole, MessageKind};

/// Where a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run the node-id handshake.
    Handshake,
    /// Promote an undefined session to bootstrap, then forward.
    PromoteBootstrap,
    /// Forward to the bootstrap server and pause.
    Bootstrap,
    /// Queue to the realtime sink.
    Realtime,
    /// Accept without effect.
    Ignore,
    /// Abort the session.
    Reject,
}

/// Route `kind` for a session in `role`.
pub fn route(role: ConnectionRole, kind: MessageKind) -> Route {
    match role {
        ConnectionRole::Undefined => match kind {
            MessageKind::NodeIdHandshake => Route::Handshake,
            k if k.is_bootstrap() => Route::PromoteBootstrap,
            _ => Route::Reject,
        },
        ConnectionRole::Bootstrap => {
            if kind.is_bootstrap() {
                Route::Bootstrap
            } else {
                Route::Reject
            }
        }
        ConnectionRole::Realtime => match kind {
            // Peers may retry a handshake on a live channel.
            MessageKind::NodeIdHandshake => Route::Ignore,
            k if k.is_realtime() => Route::Realtime,
            _ => Route::Reject,
        },
    }
}
