//! Tunnel server: UDP accept loop, query handling, backend relay.
//!
//! Every datagram is handled by its own task, bounded by a semaphore so
//! a query flood cannot pile up unbounded work. A slow backend on one
//! session never delays another: per-session state sits behind the
//! session's own lock, and the table lock is only taken for structural
//! changes.

use crate::codec::{build_error_response, build_response, parse_query};
use crate::config::ServerConfig;
use crate::session::{SessionStore, TunnelSession};
use crate::TunnelError;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Semaphore;

/// Session id used when a query carries no labels before the tunnel
/// domain. Anonymous clients that never send a payload share it.
pub const DEFAULT_SESSION_ID: &str = "default";

const RECV_BUF_SIZE: usize = 4096;

/// Covert DNS tunnel server.
pub struct TunnelServer {
    config: Arc<ServerConfig>,
    store: Arc<SessionStore>,
    socket: Arc<UdpSocket>,
}

impl TunnelServer {
    /// Bind the UDP socket and construct the server.
    pub async fn bind(config: ServerConfig) -> Result<Self, TunnelError> {
        config.validate()?;
        let socket = UdpSocket::bind(config.listen_addr).await?;
        log::info!(
            "DNS tunnel server listening on {} for *.{} → backend {}",
            config.listen_addr,
            config.tunnel_domain,
            config.backend_addr
        );
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(SessionStore::new()),
            socket: Arc::new(socket),
        })
    }

    /// Address the server actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Session table, shared with the sweep task.
    pub fn store(&self) -> Arc<SessionStore> {
        Arc::clone(&self.store)
    }

    /// Run the accept loop forever.
    pub async fn run(self) -> Result<(), TunnelError> {
        // Eviction sweep runs for the server's lifetime
        let store = Arc::clone(&self.store);
        let idle_timeout = self.config.idle_timeout;
        let mut sweep_tick = tokio::time::interval(self.config.sweep_interval);
        tokio::spawn(async move {
            loop {
                sweep_tick.tick().await;
                store.sweep(idle_timeout).await;
            }
        });

        let permits = Arc::new(Semaphore::new(self.config.max_inflight));
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let packet = buf[..len].to_vec();

            // Semaphore is never closed, so acquire only fails if it
            // were; treat that as shutdown.
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };

            let socket = Arc::clone(&self.socket);
            let store = Arc::clone(&self.store);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_query(&socket, &store, &config, &packet, peer).await {
                    log::debug!("dropped query from {}: {}", peer, e);
                }
            });
        }
    }
}

/// Handle one decoded datagram. Malformed packets error out here and
/// are silently dropped by the caller; everything else gets a response.
async fn handle_query(
    socket: &UdpSocket,
    store: &SessionStore,
    config: &ServerConfig,
    packet: &[u8],
    peer: SocketAddr,
) -> Result<(), TunnelError> {
    let query = parse_query(packet)?;

    let Some((session_id, encoded)) = split_tunnel_name(&query.domain, &config.tunnel_domain)
    else {
        log::debug!("query for foreign domain {:?} from {}", query.domain, peer);
        let response = build_error_response(packet, query.question_len);
        socket.send_to(&response, peer).await?;
        return Ok(());
    };

    let session = store.get_or_create(&session_id).await;

    let payload = config.encoding.decode(&encoded);
    if !payload.is_empty() {
        log::debug!(
            "session {}: {} bytes from {} to backend",
            session.id,
            payload.len(),
            peer
        );
        if let Err(e) = forward_to_backend(&session, config, &payload).await {
            log::warn!("session {}: backend error: {}", session.id, e);
            let response = build_error_response(packet, query.question_len);
            socket.send_to(&response, peer).await?;
            return Ok(());
        }
    }

    // The TXT answer carries transcoded text, mirroring what the
    // client decodes on its side of the exchange
    let output = session.take_pending().await;
    let encoded_output = config.encoding.encode(&output);
    let response = build_response(packet, query.question_len, encoded_output.as_bytes())?;
    socket.send_to(&response, peer).await?;
    Ok(())
}

/// Split a query name under the tunnel domain into session id and
/// concatenated encoded payload. Returns `None` when the name is not
/// under the tunnel domain at all.
fn split_tunnel_name(domain: &str, tunnel_domain: &str) -> Option<(String, String)> {
    let prefix = strip_domain_suffix(domain, tunnel_domain)?;
    if prefix.is_empty() {
        return Some((DEFAULT_SESSION_ID.to_string(), String::new()));
    }

    let mut labels: Vec<&str> = prefix.split('.').collect();
    let session_id = labels.pop()?.to_string();
    if session_id.is_empty() {
        return Some((DEFAULT_SESSION_ID.to_string(), String::new()));
    }
    Some((session_id, labels.concat()))
}

/// Case-insensitive domain suffix match; returns the prefix without the
/// trailing dot, or an empty string for an exact match.
///
/// Compares on bytes: the parsed domain may contain multi-byte
/// replacement chars from non-UTF-8 labels, so byte offsets derived
/// from the ASCII suffix must never slice the string directly.
fn strip_domain_suffix<'a>(domain: &'a str, suffix: &str) -> Option<&'a str> {
    let d = domain.as_bytes();
    let s = suffix.as_bytes();
    if d.len() < s.len() {
        return None;
    }
    let split = d.len() - s.len();
    if !d[split..].eq_ignore_ascii_case(s) {
        return None;
    }
    if split == 0 {
        return Some("");
    }
    if d[split - 1] != b'.' {
        return None;
    }
    // The byte before the suffix is an ASCII dot, so this boundary is
    // always valid; `get` keeps it panic-free regardless
    domain.get(..split - 1)
}

/// Write decoded payload to the session's backend connection, opening
/// it on demand. On first connect a reader task is spawned that drains
/// the backend into the session's pending buffer for the life of that
/// connection.
async fn forward_to_backend(
    session: &Arc<TunnelSession>,
    config: &ServerConfig,
    payload: &[u8],
) -> io::Result<()> {
    let mut state = session.lock().await;

    if state.backend.is_none() {
        let stream = TcpStream::connect(config.backend_addr).await?;
        log::info!(
            "session {}: connected to backend {}",
            session.id,
            config.backend_addr
        );
        let (read_half, write_half) = stream.into_split();
        state.backend = Some(write_half);
        state.generation += 1;
        tokio::spawn(drain_backend(
            Arc::clone(session),
            read_half,
            state.generation,
        ));
    }

    if let Some(backend) = state.backend.as_mut() {
        if let Err(e) = backend.write_all(payload).await {
            state.backend = None;
            return Err(e);
        }
    }
    Ok(())
}

/// Reader task: one per backend connection. Appends backend output to
/// the session's pending buffer; on EOF or error clears the connection
/// field so a later query can reconnect. The session itself persists
/// until idle eviction.
async fn drain_backend(session: Arc<TunnelSession>, mut read_half: OwnedReadHalf, generation: u64) {
    let mut buf = vec![0u8; RECV_BUF_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                log::debug!("session {}: backend closed", session.id);
                break;
            }
            Ok(n) => {
                let mut state = session.lock().await;
                state.pending.extend_from_slice(&buf[..n]);
            }
            Err(e) => {
                log::debug!("session {}: backend read error: {}", session.id, e);
                break;
            }
        }
    }

    let mut state = session.lock().await;
    // Only clear the connection this reader belongs to
    if state.generation == generation {
        state.backend = None;
    }
}
