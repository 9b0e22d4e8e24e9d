//! Burrow: covert DNS tunnel
//!
//! Burrow smuggles an arbitrary byte stream inside DNS query/response
//! traffic so it can traverse networks that only permit DNS resolution.
//! A client bridges a local TCP connection into a stream of TXT queries
//! under a configured tunnel domain; the server decodes the queries,
//! relays the bytes to a backend target, and returns buffered backend
//! output in TXT answers.
//!
//! ## Architecture
//!
//! ```text
//! local app → TunnelClient → DNS query → TunnelServer → backend target
//!           ←              ← TXT answer ←              ←
//! ```
//!
//! Each query carries one chunk of outbound data encoded in the QNAME as
//! `<encoded-chunk-labels>.<session-id>.<tunnel-domain>`; each response
//! carries whatever backend output has accumulated since the last poll.
//!
//! ## Quick Start
//!
//! ```bash
//! # Server side (authoritative for tunnel.example.com)
//! burrow server --domain tunnel.example.com --backend 127.0.0.1:22
//!
//! # Client side
//! burrow client --domain tunnel.example.com --resolver 192.0.2.1:53
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod server;
pub mod session;
pub mod transcode;

pub use client::TunnelClient;
pub use codec::{
    build_error_response, build_query, build_response, parse_query, parse_response_txt,
    ParsedQuery,
};
pub use config::{ClientConfig, ServerConfig};
pub use server::TunnelServer;
pub use session::{SessionStore, TunnelSession};
pub use transcode::Encoding;

/// Tunnel error types
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Input ended before a complete DNS message could be read
    #[error("truncated DNS message")]
    Truncated,

    /// Composed response would not fit the DNS UDP message limit
    #[error("response would exceed the {0}-byte DNS message limit")]
    Oversize(usize),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
