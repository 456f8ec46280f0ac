//! Connection role and its one-way transitions.

use std::sync::atomic::{AtomicU8, Ordering};

/// Long-lived role of an inbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// No role yet; only a handshake or a bootstrap request is meaningful.
    Undefined,
    /// Batch ledger sync (bulk pull/push, frontier requests).
    Bootstrap,
    /// Live gossip and consensus traffic.
    Realtime,
}

impl ConnectionRole {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionRole::Bootstrap,
            2 => ConnectionRole::Realtime,
            _ => ConnectionRole::Undefined,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ConnectionRole::Undefined => 0,
            ConnectionRole::Bootstrap => 1,
            ConnectionRole::Realtime => 2,
        }
    }
}

impl std::fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionRole::Undefined => "undefined",
            ConnectionRole::Bootstrap => "bootstrap",
            ConnectionRole::Realtime => "realtime",
        };
        f.write_str(name)
    }
}

/// Atomic holder of a [`ConnectionRole`].
///
/// INVARIANT: the role leaves `Undefined` at most once and never returns.
#[derive(Debug, Default)]
pub struct RoleCell(AtomicU8);

impl RoleCell {
    /// New cell in the `Undefined` role.
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionRole::Undefined.as_u8()))
    }

    /// Current role.
    pub fn get(&self) -> ConnectionRole {
        ConnectionRole::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `Undefined` to `target`.
    ///
    /// Returns false if the role was already classified or `target` is
    /// `Undefined`.
    pub fn promote(&self, target: ConnectionRole) -> bool {
        if target == ConnectionRole::Undefined {
            return false;
        }
        self.0
            .compare_exchange(
                ConnectionRole::Undefined.as_u8(),
                target.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
