//! Burrow configuration.
//!
//! Both halves of the tunnel are configured the same way: a serde
//! struct with sensible defaults, optionally loaded from a TOML file,
//! with explicit flags layered on top by the CLI.

use crate::codec::{MAX_LABEL_LEN, MAX_QNAME_LEN};
use crate::transcode::Encoding;
use crate::TunnelError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

fn default_server_listen() -> SocketAddr {
    "0.0.0.0:53".parse().expect("static addr")
}

fn default_client_listen() -> SocketAddr {
    "127.0.0.1:7000".parse().expect("static addr")
}

fn default_max_inflight() -> usize {
    256
}

fn default_idle_timeout() -> Duration {
    crate::session::DEFAULT_IDLE_TIMEOUT
}

fn default_sweep_interval() -> Duration {
    crate::session::DEFAULT_SWEEP_INTERVAL
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_chunk_size() -> usize {
    100
}

/// Server-side tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP listen address (conventionally port 53)
    #[serde(default = "default_server_listen")]
    pub listen_addr: SocketAddr,

    /// Domain suffix the tunnel answers for; anything else gets RCODE 3
    pub tunnel_domain: String,

    /// Backend target every session relays to
    pub backend_addr: SocketAddr,

    /// Payload encoding scheme shared with the client
    #[serde(default)]
    pub encoding: Encoding,

    /// Maximum concurrently handled queries
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,

    /// Idle threshold before a session is evicted
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Interval between eviction sweeps
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl ServerConfig {
    /// Config with defaults for everything but the required fields.
    pub fn new(tunnel_domain: String, backend_addr: SocketAddr) -> Self {
        Self {
            listen_addr: default_server_listen(),
            tunnel_domain,
            backend_addr,
            encoding: Encoding::default(),
            max_inflight: default_max_inflight(),
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), TunnelError> {
        validate_tunnel_domain(&self.tunnel_domain)?;
        if self.max_inflight == 0 {
            return Err(TunnelError::InvalidConfig(
                "max_inflight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Client-side tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local TCP listen address for the application being tunneled
    #[serde(default = "default_client_listen")]
    pub listen_addr: SocketAddr,

    /// Upstream resolver (or the tunnel server directly) queries go to
    pub resolver_addr: SocketAddr,

    /// Tunnel domain suffix, must match the server
    pub tunnel_domain: String,

    /// Payload encoding scheme shared with the server
    #[serde(default)]
    pub encoding: Encoding,

    /// Deadline for each DNS query round trip
    #[serde(default = "default_query_timeout", with = "humantime_serde")]
    pub query_timeout: Duration,

    /// Idle poll interval so backend output is not stranded while the
    /// local side is quiet; zero disables idle polling
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Raw bytes read from the local connection per query
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl ClientConfig {
    /// Config with defaults for everything but the required fields.
    pub fn new(tunnel_domain: String, resolver_addr: SocketAddr) -> Self {
        Self {
            listen_addr: default_client_listen(),
            resolver_addr,
            tunnel_domain,
            encoding: Encoding::default(),
            query_timeout: default_query_timeout(),
            poll_interval: default_poll_interval(),
            chunk_size: default_chunk_size(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration, including the QNAME budget: the encoded
    /// chunk plus its label length bytes, the session id, and the
    /// tunnel domain must fit a 253-byte name.
    pub fn validate(&self) -> Result<(), TunnelError> {
        validate_tunnel_domain(&self.tunnel_domain)?;

        if self.chunk_size == 0 {
            return Err(TunnelError::InvalidConfig(
                "chunk_size must be at least 1".into(),
            ));
        }

        let encoded = self.encoding.encoded_len(self.chunk_size);
        let label_overhead = encoded.div_ceil(MAX_LABEL_LEN);
        // 20 bytes of session id, plus dots around it
        let qname = encoded + label_overhead + 20 + 2 + self.tunnel_domain.len();
        if qname > MAX_QNAME_LEN {
            return Err(TunnelError::InvalidConfig(format!(
                "chunk_size {} encodes to a {}-byte QNAME, over the {}-byte limit",
                self.chunk_size, qname, MAX_QNAME_LEN
            )));
        }
        Ok(())
    }
}

fn validate_tunnel_domain(domain: &str) -> Result<(), TunnelError> {
    if domain.is_empty() {
        return Err(TunnelError::InvalidConfig(
            "tunnel domain must be set".into(),
        ));
    }
    for label in domain.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(TunnelError::InvalidConfig(format!(
                "bad tunnel domain label {:?}",
                label
            )));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            return Err(TunnelError::InvalidConfig(format!(
                "tunnel domain label {:?} has non-DNS characters",
                label
            )));
        }
    }
    Ok(())
}
