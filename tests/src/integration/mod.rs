//! # Integration Tests
//!
//! End-to-end ingress flows over loopback TCP, with a minimal framing
//! codec standing in for the node's wire format.

pub mod tcp_ingress;
