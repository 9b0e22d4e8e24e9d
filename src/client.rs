//! Client tunnel driver.
//!
//! Bridges a local TCP connection into DNS TXT queries: each chunk read
//! from the local side becomes one query named
//! `<encoded-chunk-labels>.<session>.<tunnel-domain>`, and each answer's
//! TXT payload is written back to the local connection. Because the
//! server only ever speaks when spoken to, an idle poll timer keeps
//! backend output flowing while the local side is quiet.

use crate::codec::{build_query, parse_response_txt, MAX_LABEL_LEN};
use crate::config::ClientConfig;
use crate::TunnelError;
use std::io;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;

/// Covert DNS tunnel client.
pub struct TunnelClient {
    config: ClientConfig,
    listener: TcpListener,
}

enum LocalRead {
    Data(usize),
    Eof,
    /// Poll tick fired with no local data; send an empty query anyway
    /// so buffered backend output can come home
    Idle,
}

impl TunnelClient {
    /// Bind the local TCP listener and construct the client.
    pub async fn bind(config: ClientConfig) -> Result<Self, TunnelError> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        log::info!(
            "DNS tunnel client listening on {} → resolver {} ({})",
            config.listen_addr,
            config.resolver_addr,
            config.tunnel_domain
        );
        Ok(Self { config, listener })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve local connections, one at a time. Each gets a
    /// fresh time-derived session id.
    pub async fn run(self) -> Result<(), TunnelError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let session_id = new_session_id();
            log::info!("local connection from {} (session {})", peer, session_id);

            match self.serve_connection(stream, &session_id).await {
                Ok(()) => log::info!("session {} finished", session_id),
                Err(e) => log::warn!("session {} ended: {}", session_id, e),
            }
        }
    }

    async fn serve_connection(
        &self,
        mut stream: TcpStream,
        session_id: &str,
    ) -> Result<(), TunnelError> {
        let mut buf = vec![0u8; self.config.chunk_size];

        loop {
            let read = if self.config.poll_interval.is_zero() {
                match stream.read(&mut buf).await? {
                    0 => LocalRead::Eof,
                    n => LocalRead::Data(n),
                }
            } else {
                match timeout(self.config.poll_interval, stream.read(&mut buf)).await {
                    Ok(Ok(0)) => LocalRead::Eof,
                    Ok(Ok(n)) => LocalRead::Data(n),
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => LocalRead::Idle,
                }
            };

            let chunk: &[u8] = match read {
                LocalRead::Eof => break,
                LocalRead::Data(n) => &buf[..n],
                LocalRead::Idle => &[],
            };

            let name = self.compose_name(chunk, session_id);
            match self.exchange(&name).await {
                Ok(reply) if !reply.is_empty() => {
                    log::debug!("session {}: {} bytes from tunnel", session_id, reply.len());
                    stream.write_all(&reply).await?;
                }
                Ok(_) => {}
                // Lossy transport is expected; whatever this poll would
                // have carried comes back on a later one
                Err(e) => log::debug!("session {}: query failed: {}", session_id, e),
            }
        }
        Ok(())
    }

    /// Compose the query name for one chunk. The encoded chunk is split
    /// into 63-byte labels; an empty chunk yields a bare poll name.
    fn compose_name(&self, chunk: &[u8], session_id: &str) -> String {
        if chunk.is_empty() {
            return format!("{}.{}", session_id, self.config.tunnel_domain);
        }

        let encoded = self.config.encoding.encode(chunk);
        let mut name = String::with_capacity(encoded.len() + encoded.len() / MAX_LABEL_LEN + 64);
        for label in encoded.as_bytes().chunks(MAX_LABEL_LEN) {
            // Encoded text is ASCII for every real scheme
            name.push_str(&String::from_utf8_lossy(label));
            name.push('.');
        }
        name.push_str(session_id);
        name.push('.');
        name.push_str(&self.config.tunnel_domain);
        name
    }

    /// One query/response round trip over a fresh ephemeral socket,
    /// bounded by the configured deadline.
    async fn exchange(&self, name: &str) -> Result<Vec<u8>, TunnelError> {
        let local: SocketAddr = if self.config.resolver_addr.is_ipv4() {
            if self.config.resolver_addr.ip().is_loopback() {
                "127.0.0.1:0"
            } else {
                "0.0.0.0:0"
            }
        } else if self.config.resolver_addr.ip().is_loopback() {
            "[::1]:0"
        } else {
            "[::]:0"
        }
        .parse()
        .expect("static addr");

        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.config.resolver_addr).await?;
        socket.send(&build_query(name)).await?;

        let mut buf = vec![0u8; 4096];
        let n = timeout(self.config.query_timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| {
                TunnelError::Io(io::Error::new(io::ErrorKind::TimedOut, "query timed out"))
            })??;

        let txt = parse_response_txt(&buf[..n])?;
        let text = String::from_utf8_lossy(&txt);
        Ok(self.config.encoding.decode(&text))
    }
}

/// Session id from the current time plus random bits, label-safe.
fn new_session_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{:x}{:04x}", secs, rand::random::<u16>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::Encoding;

    fn test_config() -> ClientConfig {
        ClientConfig::new("tunnel.example.com".into(), "127.0.0.1:53".parse().unwrap())
    }

    #[tokio::test]
    async fn compose_name_splits_labels() {
        let mut config = test_config();
        config.encoding = Encoding::Hex;
        let client = TunnelClient {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            config,
        };

        // 50 bytes → 100 hex chars → two labels of 63 + 37
        let name = client.compose_name(&[0xab; 50], "sess1");
        let labels: Vec<&str> = name.split('.').collect();
        assert_eq!(labels[0].len(), 63);
        assert_eq!(labels[1].len(), 37);
        assert_eq!(labels[2], "sess1");
        assert_eq!(&labels[3..], &["tunnel", "example", "com"]);

        // Server-side reassembly: concatenated labels decode back
        let joined: String = labels[..2].concat();
        assert_eq!(Encoding::Hex.decode(&joined), vec![0xab; 50]);
    }

    #[tokio::test]
    async fn compose_name_empty_chunk_is_bare_poll() {
        let client = TunnelClient {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            config: test_config(),
        };
        assert_eq!(client.compose_name(&[], "s7"), "s7.tunnel.example.com");
    }

    #[test]
    fn session_ids_are_label_safe_and_distinct() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.len() <= 20);
        assert!(a.bytes().all(|b| b.is_ascii_alphanumeric()));
        // Random tail makes collisions within one second unlikely
        assert_ne!(a, b);
    }
}
