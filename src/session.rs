//! Tunnel session tracking.
//!
//! Each session maps a client-chosen id to a backend connection and a
//! buffer of backend output waiting for the next poll. The store is
//! owned by the server instance; structural changes (insert/remove) go
//! through the table lock while data-plane mutation takes only the
//! per-session lock, so a slow backend never serializes unrelated
//! sessions.

use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, MutexGuard, RwLock};

/// Idle threshold before a session is evicted (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between eviction sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Mutable session state guarded by the per-session lock.
#[derive(Default)]
pub struct SessionState {
    /// Write half of the backend connection; the paired read half is
    /// owned by the session's reader task. Cleared on write failure or
    /// when the reader hits EOF/error, so a later query can reconnect.
    pub backend: Option<OwnedWriteHalf>,
    /// Backend output accumulated since the last poll
    pub pending: BytesMut,
    /// Bumped on every new backend connection; lets a stale reader task
    /// avoid clearing a connection it no longer owns
    pub generation: u64,
}

/// One tunnel session: a logical bidirectional stream multiplexed over
/// many independent DNS query/response exchanges.
pub struct TunnelSession {
    pub id: String,
    state: Mutex<SessionState>,
    last_active: StdMutex<Instant>,
}

impl TunnelSession {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: Mutex::new(SessionState::default()),
            last_active: StdMutex::new(Instant::now()),
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&self) {
        if let Ok(mut t) = self.last_active.lock() {
            *t = Instant::now();
        }
    }

    /// Time since the session was last referenced by a query.
    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Acquire the per-session lock.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Atomically read and clear the pending backend output.
    pub async fn take_pending(&self) -> Vec<u8> {
        let mut state = self.state.lock().await;
        state.pending.split().to_vec()
    }

    /// Shut down and drop the backend connection, if any.
    pub async fn close_backend(&self) {
        let mut state = self.state.lock().await;
        if let Some(mut backend) = state.backend.take() {
            let _ = backend.shutdown().await;
        }
    }
}

/// Table of live tunnel sessions keyed by session id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<TunnelSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Return the session for `id`, inserting a fresh one on first
    /// sight. Always refreshes the activity timestamp.
    pub async fn get_or_create(&self, id: &str) -> Arc<TunnelSession> {
        if let Some(session) = self.sessions.read().await.get(id) {
            session.touch();
            return Arc::clone(session);
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                log::info!("new tunnel session {}", id);
                Arc::new(TunnelSession::new(id))
            });
        session.touch();
        Arc::clone(session)
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions idle beyond `idle_timeout`, closing any open
    /// backend connection.
    pub async fn sweep(&self, idle_timeout: Duration) {
        let expired: Vec<Arc<TunnelSession>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.idle_for() > idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in expired {
            log::info!("evicting idle session {}", session.id);
            session.close_backend().await;
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    #[tokio::test]
    async fn get_or_create_reuses_sessions() {
        let store = SessionStore::new();
        let a = store.get_or_create("sess1").await;
        let b = store.get_or_create("sess1").await;
        let c = store.get_or_create("sess2").await;

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn take_pending_clears_the_buffer() {
        let store = SessionStore::new();
        let session = store.get_or_create("sess1").await;

        session.lock().await.pending.extend_from_slice(b"world");
        assert_eq!(session.take_pending().await, b"world");

        // A second poll with no new output must be empty, not a repeat
        assert!(session.take_pending().await.is_empty());
    }

    #[tokio::test]
    async fn sweep_evicts_idle_sessions() {
        let store = SessionStore::new();
        store.get_or_create("idle").await;
        assert_eq!(store.len().await, 1);

        // Nothing is older than a generous threshold
        store.sweep(Duration::from_secs(300)).await;
        assert_eq!(store.len().await, 1);

        // Everything is older than a zero threshold
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.sweep(Duration::ZERO).await;
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn sweep_closes_the_evicted_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            stream
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (_read_half, write_half) = stream.into_split();
        let mut peer = accepted.await.unwrap();

        let store = SessionStore::new();
        let session = store.get_or_create("doomed").await;
        session.lock().await.backend = Some(write_half);

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.sweep(Duration::ZERO).await;
        assert_eq!(store.len().await, 0);

        // The peer sees EOF once eviction shuts the connection down
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .expect("backend connection was not closed by the sweep")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn touch_defers_eviction() {
        let store = SessionStore::new();
        let session = store.get_or_create("busy").await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.touch();
        store.sweep(Duration::from_millis(10)).await;
        assert_eq!(store.len().await, 1);
    }
}
