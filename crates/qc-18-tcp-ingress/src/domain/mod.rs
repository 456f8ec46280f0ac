//! Domain Layer - Pure ingress rules with no I/O
//!
//! This module contains:
//! - Peer message sum type and its classification
//! - Node-id handshake payloads and outcomes
//! - Connection roles with one-way transitions
//! - Address normalisation for per-IP / per-subnet limits
//! - Error taxonomy

pub mod errors;
pub mod handshake;
pub mod message;
pub mod role;
pub mod subnet;
pub mod value_objects;

pub use errors::*;
pub use handshake::*;
pub use message::*;
pub use role::*;
pub use subnet::*;
pub use value_objects::*;
