//! # TCP Ingress Subsystem
//!
//! **Subsystem ID:** 18
//!
//! Accepts inbound peer connections, enforces per-IP and per-subnetwork
//! admission limits, and classifies each connection as either a bootstrap
//! or a realtime connection through the node-id handshake.
//!
//! Wire encoding, bootstrap serving and realtime processing belong to the
//! host node; this crate only admits, classifies and hands off.
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture with:
//! - **Domain Layer:** Messages, roles, handshake payloads, address
//!   normalisation, errors
//! - **Ports Layer:** Socket, codec, handshake authority, bootstrap server,
//!   realtime sink, diagnostics
//! - **Service Layer:** [`TcpListener`] (acceptor) and [`Session`]
//! - **Adapters Layer:** Tokio TCP socket, syn-cookie handshake authority
//!
//! ## Admission Limits
//!
//! | limit      | IPv4          | IPv6  |
//! |------------|---------------|-------|
//! | per-IP     | exact address | /48   |
//! | per-subnet | /24           | /32   |
//!
//! ## Example
//!
//! ```rust
//! use qc_18_tcp_ingress::{map_address_to_subnetwork, ConnectionRole, RoleCell};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let peer = IpAddr::V4(Ipv4Addr::new(80, 67, 148, 225));
//! assert_eq!(
//!     map_address_to_subnetwork(peer).to_string(),
//!     "::ffff:80.67.148.0"
//! );
//!
//! // Roles change once, from undefined.
//! let role = RoleCell::new();
//! assert!(role.promote(ConnectionRole::Realtime));
//! assert!(!role.promote(ConnectionRole::Bootstrap));
//! ```

// =============================================================================
// MODULES
// =============================================================================

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

/// Requires feature: `test-utils`
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// =============================================================================
// RE-EXPORTS
// =============================================================================

// Domain
pub use domain::{
    ipv4_address_or_ipv6_subnet, map_address_to_subnetwork, AbortReason, ConnectionRole,
    DeserializeError, HandshakeError, HandshakeQuery, HandshakeResponse, HandshakeStatus,
    HandshakeV2, Keepalive, ListenerError, Message, MessageKind, NodeId, NodeIdHandshake,
    RejectReason, RoleCell, SessionId, TransportError,
};

// Configuration
pub use config::{ConfigError, ListenerConfig, SessionConfig};

// Port traits
pub use ports::{
    BootstrapServer, ConnectionDiagnostics, HandshakeAuthority, MessageCodec,
    MessageDeserializer, RealtimeSink, Socket,
};

// Service
pub use service::{
    IngressStats, OnConnected, ProcessResult, ResumeHandle, Session, SessionContext,
    TcpListener,
};

// Adapters
pub use adapters::{SynCookieAuthority, TokioSocket};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
