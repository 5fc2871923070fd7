//! Registry of connected peers
//!
//! The server's only shared mutable structure. Broadcasts run under the read
//! lock and insert/remove take the write lock, so a peer can never be removed
//! while a broadcast is writing to it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::connection::Connection;

/// Snapshot of one registered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: u32,
    pub addr: SocketAddr,
    pub connected_for: Duration,
    pub frames_sent: u64,
}

pub struct PeerRegistry {
    peers: RwLock<HashMap<u32, Arc<Connection>>>,
    next_id: AtomicU32,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocate a sender id, never reused for the life of the server
    pub fn allocate_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, conn: Arc<Connection>) {
        self.peers.write().insert(conn.id(), conn);
    }

    /// Remove and close a peer. Returns it if this call removed it.
    pub fn remove(&self, id: u32) -> Option<Arc<Connection>> {
        let mut peers = self.peers.write();
        let conn = peers.remove(&id)?;
        conn.close();
        Some(conn)
    }

    /// Write `frame` to every peer except `sender`.
    ///
    /// A failed write does not stop delivery to the rest. Returns the ids
    /// whose write failed; the caller removes them.
    pub fn broadcast_except(&self, sender: u32, frame: &[u8]) -> Vec<u32> {
        let peers = self.peers.read();
        let mut failed = Vec::new();
        for (&id, conn) in peers.iter() {
            if id == sender {
                continue;
            }
            if let Err(e) = conn.send(frame) {
                tracing::debug!(peer = id, "relay write failed: {}", e);
                failed.push(id);
            }
        }
        failed
    }

    pub fn contains(&self, id: u32) -> bool {
        self.peers.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Peers ordered by id
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<PeerInfo> = self
            .peers
            .read()
            .values()
            .map(|conn| PeerInfo {
                id: conn.id(),
                addr: conn.peer_addr(),
                connected_for: conn.connected_at().elapsed(),
                frames_sent: conn.frames_sent(),
            })
            .collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Remove and close every peer
    pub fn close_all(&self) -> Vec<u32> {
        let mut peers = self.peers.write();
        let ids: Vec<u32> = peers.keys().copied().collect();
        for (_, conn) in peers.drain() {
            conn.close();
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    fn peer(registry: &PeerRegistry, listener: &TcpListener) -> (u32, TcpStream) {
        let remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (local, _) = listener.accept().unwrap();
        local.set_write_timeout(Some(Duration::from_millis(250))).unwrap();
        let id = registry.allocate_id();
        let (conn, _reader) = Connection::new(id, local).unwrap();
        registry.insert(conn);
        (id, remote)
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = PeerRegistry::new();
        let (a, mut remote_a) = peer(&registry, &listener);
        let (_b, mut remote_b) = peer(&registry, &listener);
        let (_c, mut remote_c) = peer(&registry, &listener);

        assert!(registry.broadcast_except(a, b"xyz").is_empty());
        registry.close_all();

        for remote in [&mut remote_b, &mut remote_c] {
            let mut got = Vec::new();
            remote.read_to_end(&mut got).unwrap();
            assert_eq!(got, b"xyz");
        }
        let mut got = Vec::new();
        remote_a.read_to_end(&mut got).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_remove_is_once() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = PeerRegistry::new();
        let (a, _remote) = peer(&registry, &listener);
        let (b, _remote_b) = peer(&registry, &listener);
        assert_ne!(a, b);

        let removed = registry.remove(a).unwrap();
        assert!(!removed.is_open());
        assert!(registry.remove(a).is_none());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.peers()[0].id, b);
    }

    #[test]
    fn test_failed_write_does_not_stop_broadcast() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = PeerRegistry::new();
        let (a, _remote_a) = peer(&registry, &listener);
        let (b, _remote_b) = peer(&registry, &listener);
        let (_c, mut remote_c) = peer(&registry, &listener);
        let (_d, mut remote_d) = peer(&registry, &listener);

        registry.peers.read()[&b].close();
        assert_eq!(registry.broadcast_except(a, b"frame"), vec![b]);
        registry.close_all();

        for remote in [&mut remote_c, &mut remote_d] {
            let mut got = Vec::new();
            remote.read_to_end(&mut got).unwrap();
            assert_eq!(got, b"frame");
        }
    }

    #[test]
    fn test_stalled_peer_times_out_alone() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let registry = PeerRegistry::new();
        let (a, _remote_a) = peer(&registry, &listener);
        let (stalled, _remote_stalled) = peer(&registry, &listener);
        let (_c, mut remote_c) = peer(&registry, &listener);

        let drain = std::thread::spawn(move || {
            let mut total = 0usize;
            let mut buf = [0u8; 64 * 1024];
            while let Ok(n) = remote_c.read(&mut buf) {
                if n == 0 {
                    break;
                }
                total += n;
            }
            total
        });

        let frame = vec![0x5a; 256 * 1024];
        let mut sent = 0usize;
        let mut failed = Vec::new();
        for _ in 0..400 {
            failed = registry.broadcast_except(a, &frame);
            sent += frame.len();
            if !failed.is_empty() {
                break;
            }
        }
        assert_eq!(failed, vec![stalled]);

        registry.close_all();
        assert_eq!(drain.join().unwrap(), sent);
    }
}
