//! # Driving Ports (Inbound API)
//!
//! Read-only view the node's reporting layer uses.

use crate::service::IngressStats;

/// Aggregate health of the ingress subsystem.
///
/// Individual session errors never surface here; only counts.
pub trait ConnectionDiagnostics: Send + Sync {
    /// Registered sessions, possibly including dead entries not yet swept.
    fn connection_count(&self) -> usize;

    /// Sessions classified as bootstrap.
    fn bootstrap_count(&self) -> usize;

    /// Sessions classified as realtime.
    fn realtime_count(&self) -> usize;

    /// Counter snapshot.
    fn stats(&self) -> IngressStats;
}
