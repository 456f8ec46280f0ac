//! # Adapters
//!
//! - [`TokioSocket`]: `Socket` over a tokio `TcpStream`
//! - [`SynCookieAuthority`]: `HandshakeAuthority` over an ed25519 node key

pub mod syn_cookies;
pub mod tcp;

pub use syn_cookies::SynCookieAuthority;
pub use tcp::TokioSocket;
