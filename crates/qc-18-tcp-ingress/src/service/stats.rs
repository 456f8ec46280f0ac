//! Shared counters.
//!
//! [`RoleCounters`] is shared between the listener and its sessions so a
//! session can release its slot on stop without holding the listener.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::domain::{ConnectionRole, RejectReason};

/// Live sessions per classified role.
#[derive(Debug, Default)]
pub struct RoleCounters {
    bootstrap: AtomicUsize,
    realtime: AtomicUsize,
}

impl RoleCounters {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sessions currently classified bootstrap.
    pub fn bootstrap(&self) -> usize {
        self.bootstrap.load(Ordering::Acquire)
    }

    /// Sessions currently classified realtime.
    pub fn realtime(&self) -> usize {
        self.realtime.load(Ordering::Acquire)
    }

    /// Take a bootstrap slot unless `max` are in use.
    pub fn try_acquire_bootstrap(&self, max: usize) -> bool {
        self.bootstrap
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }

    /// Count a realtime promotion.
    pub fn acquire_realtime(&self) {
        self.realtime.fetch_add(1, Ordering::AcqRel);
    }

    /// Release the slot held by a session leaving `role`.
    pub fn release(&self, role: ConnectionRole) {
        let counter = match role {
            ConnectionRole::Bootstrap => &self.bootstrap,
            ConnectionRole::Realtime => &self.realtime,
            ConnectionRole::Undefined => return,
        };
        // Saturating: a release without a matching acquire must not wrap.
        let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }
}

/// Monotonic ingress counters.
#[derive(Debug, Default)]
pub struct IngressMetrics {
    accepted: AtomicU64,
    accept_failures: AtomicU64,
    rejected_max_inbound: AtomicU64,
    rejected_per_ip: AtomicU64,
    rejected_per_subnetwork: AtomicU64,
    handshakes: AtomicU64,
    handshake_responses_sent: AtomicU64,
    handshake_aborts: AtomicU64,
    bootstrap_promotions: AtomicU64,
    realtime_promotions: AtomicU64,
    bootstrap_forwarded: AtomicU64,
    realtime_forwarded: AtomicU64,
    recoverable_errors: AtomicU64,
    aborted_sessions: AtomicU64,
    timeouts: AtomicU64,
}

macro_rules! bump {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Increment `", stringify!($field), "`.")]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl IngressMetrics {
    /// Zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    bump! {
        record_accepted => accepted,
        record_accept_failure => accept_failures,
        record_handshake => handshakes,
        record_handshake_response => handshake_responses_sent,
        record_handshake_abort => handshake_aborts,
        record_bootstrap_promotion => bootstrap_promotions,
        record_realtime_promotion => realtime_promotions,
        record_bootstrap_forwarded => bootstrap_forwarded,
        record_realtime_forwarded => realtime_forwarded,
        record_recoverable_error => recoverable_errors,
        record_aborted_session => aborted_sessions,
        record_timeout => timeouts,
    }

    /// Count an admission rejection.
    pub fn record_rejection(&self, reason: RejectReason) {
        let counter = match reason {
            RejectReason::MaxInbound => &self.rejected_max_inbound,
            RejectReason::MaxPerIp => &self.rejected_per_ip,
            RejectReason::MaxPerSubnetwork => &self.rejected_per_subnetwork,
            RejectReason::Stopped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy.
    pub fn snapshot(&self) -> IngressStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        IngressStats {
            accepted: load(&self.accepted),
            accept_failures: load(&self.accept_failures),
            rejected_max_inbound: load(&self.rejected_max_inbound),
            rejected_per_ip: load(&self.rejected_per_ip),
            rejected_per_subnetwork: load(&self.rejected_per_subnetwork),
            handshakes: load(&self.handshakes),
            handshake_responses_sent: load(&self.handshake_responses_sent),
            handshake_aborts: load(&self.handshake_aborts),
            bootstrap_promotions: load(&self.bootstrap_promotions),
            realtime_promotions: load(&self.realtime_promotions),
            bootstrap_forwarded: load(&self.bootstrap_forwarded),
            realtime_forwarded: load(&self.realtime_forwarded),
            recoverable_errors: load(&self.recoverable_errors),
            aborted_sessions: load(&self.aborted_sessions),
            timeouts: load(&self.timeouts),
        }
    }
}

/// Snapshot of [`IngressMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngressStats {
    /// Sockets admitted.
    pub accepted: u64,
    /// Raw accept errors.
    pub accept_failures: u64,
    /// Rejected at the inbound ceiling.
    pub rejected_max_inbound: u64,
    /// Rejected by the per-IP limit.
    pub rejected_per_ip: u64,
    /// Rejected by the per-subnet limit.
    pub rejected_per_subnetwork: u64,
    /// Handshake messages processed.
    pub handshakes: u64,
    /// Handshake responses written.
    pub handshake_responses_sent: u64,
    /// Handshakes that aborted the session.
    pub handshake_aborts: u64,
    /// Sessions promoted to bootstrap.
    pub bootstrap_promotions: u64,
    /// Sessions promoted to realtime.
    pub realtime_promotions: u64,
    /// Messages handed to the bootstrap server.
    pub bootstrap_forwarded: u64,
    /// Messages queued to the realtime sink.
    pub realtime_forwarded: u64,
    /// Skipped recoverable decode errors.
    pub recoverable_errors: u64,
    /// Sessions ended by an abort.
    pub aborted_sessions: u64,
    /// Sessions ended by the idle timer.
    pub timeouts: u64,
}

impl IngressStats {
    /// All admission rejections.
    pub fn rejected(&self) -> u64 {
        self.rejected_max_inbound + self.rejected_per_ip + self.rejected_per_subnetwork
    }
}
