//! One established duplex link
//!
//! Writes go through a mutex so whole frames never interleave. Closing takes
//! the same lock, so a close waits for an in-flight write to finish and no
//! write can start once the close has begun.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::error::NetworkError;

pub struct Connection {
    id: u32,
    peer_addr: SocketAddr,
    connected_at: Instant,
    writer: Mutex<TcpStream>,
    closed: AtomicBool,
    frames_sent: AtomicU64,
}

impl Connection {
    /// Wrap `stream`, returning the connection and a clone for the reader
    pub fn new(id: u32, stream: TcpStream) -> io::Result<(Arc<Self>, TcpStream)> {
        let peer_addr = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        let conn = Arc::new(Self {
            id,
            peer_addr,
            connected_at: Instant::now(),
            writer: Mutex::new(stream),
            closed: AtomicBool::new(false),
            frames_sent: AtomicU64::new(0),
        });
        Ok((conn, reader))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Write one encoded frame
    pub fn send(&self, frame: &[u8]) -> Result<(), NetworkError> {
        let mut writer = self.writer.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(NetworkError::Closed);
        }
        writer.write_all(frame).map_err(NetworkError::Transport)?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Shut down both directions. Idempotent.
    ///
    /// The reader blocked on the cloned stream wakes with EOF.
    pub fn close(&self) {
        let writer = self.writer.lock();
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = writer.shutdown(Shutdown::Both);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_send_then_close() {
        let (local, mut remote) = pair();
        let (conn, _reader) = Connection::new(7, local).unwrap();

        conn.send(b"hello").unwrap();
        assert_eq!(conn.frames_sent(), 1);
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert!(matches!(conn.send(b"late"), Err(NetworkError::Closed)));

        let mut received = Vec::new();
        remote.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello");
    }

    #[test]
    fn test_close_wakes_reader() {
        let (local, _remote) = pair();
        let (conn, mut reader) = Connection::new(1, local).unwrap();
        conn.close();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap_or(0), 0);
    }
}
