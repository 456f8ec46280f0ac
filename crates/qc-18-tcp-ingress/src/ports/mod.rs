//! Ports Layer - Trait definitions for external dependencies
//!
//! - `inbound` - diagnostics API the node reads from
//! - `outbound` - socket, codec, handshake authority, bootstrap and realtime sinks

pub mod inbound;
pub mod outbound;

pub use inbound::ConnectionDiagnostics;
pub use outbound::{
    BootstrapServer, HandshakeAuthority, MessageCodec, MessageDeserializer, RealtimeSink, Socket,
};
