//! # Quantum-Chain Test Suite
//!
//! Unified test crate for the TCP ingress subsystem.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── benchmarks/       # Admission and handshake hot paths
//! │   └── qc_18_tcp_ingress.rs
//! │
//! └── integration/      # Real sockets over loopback
//!     └── tcp_ingress.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # By category
//! cargo test -p qc-tests integration::
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod benchmarks;
pub mod integration;
