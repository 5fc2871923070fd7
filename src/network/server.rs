//! Relay server
//!
//! One accept thread plus one reader thread per peer. Every frame read from
//! a peer is written unchanged to every other peer. The server also tells
//! peers when someone joins or leaves.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::connection::Connection;
use super::registry::{PeerInfo, PeerRegistry};
use super::socket::{bind_listener, configure_stream};
use crate::codec::{FrameDecoder, ReadOutcome};
use crate::config::ServerConfig;
use crate::constants::READ_POLL_INTERVAL;
use crate::error::{Error, NetworkError, Result};
use crate::events::{EventSink, VoiceEvent};
use crate::protocol::{ControlMessage, Frame, FrameType, RawFrame};

/// Sleep between accept polls while idle
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Server status snapshot
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub running: bool,
    pub local_addr: SocketAddr,
    pub peer_count: usize,
    pub peers: Vec<PeerInfo>,
    pub frames_relayed: u64,
}

struct ServerShared {
    config: ServerConfig,
    local_addr: SocketAddr,
    registry: PeerRegistry,
    events: EventSink,
    shutdown: AtomicBool,
    frames_relayed: AtomicU64,
    readers: Mutex<Vec<JoinHandle<()>>>,
}

/// Entry point for the relay server
pub struct VoiceServer;

impl VoiceServer {
    /// Bind and start accepting peers.
    ///
    /// Bind failures are returned immediately and are not retried.
    pub fn start(config: ServerConfig, events: EventSink) -> Result<ServerHandle> {
        if let Err(e) = config.validate() {
            let err = Error::from(e);
            events.error(&err);
            return Err(err);
        }
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = match bind_listener(addr) {
            Ok(listener) => listener,
            Err(e) => {
                let err = Error::from(e);
                events.error(&err);
                return Err(err);
            }
        };
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ServerShared {
            config,
            local_addr,
            registry: PeerRegistry::new(),
            events,
            shutdown: AtomicBool::new(false),
            frames_relayed: AtomicU64::new(0),
            readers: Mutex::new(Vec::new()),
        });

        let accept_thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("voice-accept".into())
                .spawn(move || accept_loop(shared, listener))?
        };

        tracing::info!(
            addr = %local_addr,
            profile = %shared.config.profile,
            "voice server listening"
        );
        Ok(ServerHandle {
            shared,
            accept_thread: Some(accept_thread),
        })
    }
}

/// Running server; dropping it shuts the server down
pub struct ServerHandle {
    shared: Arc<ServerShared>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::Acquire)
    }

    pub fn peer_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn status(&self) -> ServerStatus {
        let peers = self.shared.registry.peers();
        ServerStatus {
            running: self.is_running(),
            local_addr: self.shared.local_addr,
            peer_count: peers.len(),
            peers,
            frames_relayed: self.shared.frames_relayed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting, close every peer and join all threads
    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(addr = %self.shared.local_addr, "voice server stopping");

        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        self.shared.registry.close_all();

        let readers = std::mem::take(&mut *self.shared.readers.lock());
        for handle in readers {
            let _ = handle.join();
        }
        tracing::info!("voice server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(shared: Arc<ServerShared>, listener: TcpListener) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = accept_peer(&shared, stream, addr) {
                    tracing::warn!(%addr, "failed to accept peer: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    tracing::debug!("accept loop exited");
}

fn accept_peer(shared: &Arc<ServerShared>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    if shared.registry.len() >= shared.config.max_peers {
        tracing::warn!(
            %addr,
            max = shared.config.max_peers,
            "peer limit reached, rejecting connection"
        );
        return Ok(());
    }

    configure_stream(
        &stream,
        shared.config.tcp_nodelay,
        READ_POLL_INTERVAL,
        shared.config.write_timeout,
    )?;

    let id = shared.registry.allocate_id();
    let (conn, reader) = Connection::new(id, stream)?;

    // Welcome goes out before registration so it is always the first frame
    let welcome = ControlMessage::Welcome {
        sender_id: id,
        profile: shared.config.profile,
    };
    conn.send(&welcome.to_bytes()?)?;
    shared.registry.insert(conn.clone());

    tracing::info!(peer = id, %addr, peers = shared.registry.len(), "peer connected");
    shared.events.emit(VoiceEvent::PeerJoined { sender_id: id });
    broadcast_control(shared, id, &ControlMessage::PeerJoined { sender_id: id });

    let handle = {
        let shared = shared.clone();
        thread::Builder::new()
            .name(format!("voice-peer-{id}"))
            .spawn(move || reader_loop(shared, conn, reader))?
    };

    let mut readers = shared.readers.lock();
    readers.retain(|h| !h.is_finished());
    readers.push(handle);
    Ok(())
}

fn reader_loop(shared: Arc<ServerShared>, conn: Arc<Connection>, mut stream: TcpStream) {
    let id = conn.id();
    let mut decoder = FrameDecoder::default();

    while !shared.shutdown.load(Ordering::Acquire) && conn.is_open() {
        match decoder.read_frame(&mut stream) {
            Ok(ReadOutcome::Frame(raw)) => {
                if !handle_frame(&shared, id, raw) {
                    break;
                }
            }
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => {
                tracing::debug!(peer = id, "peer closed the connection");
                break;
            }
            Err(e) => {
                if conn.is_open() && !shared.shutdown.load(Ordering::Acquire) {
                    report_peer_error(&shared, id, NetworkError::from(e));
                }
                break;
            }
        }
    }

    drop_peers(&shared, vec![id]);
}

/// Relay one frame. Returns false once the peer said goodbye.
///
/// Control payloads are inspected only for their side effects; one this
/// build cannot parse is still relayed.
fn handle_frame(shared: &ServerShared, id: u32, raw: RawFrame) -> bool {
    let mut keep_reading = true;

    if raw.frame_type == FrameType::Control {
        match Frame::from_raw(raw.clone()) {
            Ok(Frame::Control(ControlMessage::ProfileAnnounce { profile, .. })) => {
                tracing::info!(peer = id, %profile, "peer announced profile");
                shared.events.emit(VoiceEvent::ProfileAnnounced { sender_id: id, profile });
            }
            Ok(Frame::Control(ControlMessage::Goodbye { .. })) => {
                tracing::info!(peer = id, "peer said goodbye");
                keep_reading = false;
            }
            Ok(Frame::Control(message)) => tracing::trace!(peer = id, ?message, "control frame"),
            Ok(Frame::Audio(_)) => {}
            Err(e) => tracing::debug!(peer = id, "relaying opaque control frame: {}", e),
        }
    }

    let failed = shared.registry.broadcast_except(id, &raw.to_bytes());
    shared.frames_relayed.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(peer = id, bytes = raw.encoded_len(), "relayed frame");
    drop_peers(shared, failed);

    keep_reading
}

fn report_peer_error(shared: &ServerShared, id: u32, err: NetworkError) {
    tracing::warn!(peer = id, kind = %err.kind(), "dropping peer: {}", err);
    shared.events.error(&Error::from(err));
}

/// Remove peers and tell the rest. Write failures while announcing a
/// departure cascade into further removals.
fn drop_peers(shared: &ServerShared, mut ids: Vec<u32>) {
    while let Some(id) = ids.pop() {
        let Some(conn) = shared.registry.remove(id) else {
            continue;
        };
        tracing::info!(
            peer = id,
            addr = %conn.peer_addr(),
            peers = shared.registry.len(),
            "peer disconnected"
        );
        shared.events.emit(VoiceEvent::PeerLeft { sender_id: id });

        let notice = ControlMessage::PeerLeft { sender_id: id };
        match notice.to_bytes() {
            Ok(bytes) => ids.extend(shared.registry.broadcast_except(id, &bytes)),
            Err(e) => tracing::error!(peer = id, "failed to encode departure notice: {}", e),
        }
    }
}

fn broadcast_control(shared: &ServerShared, sender: u32, message: &ControlMessage) {
    match message.to_bytes() {
        Ok(bytes) => {
            let failed = shared.registry.broadcast_except(sender, &bytes);
            drop_peers(shared, failed);
        }
        Err(e) => tracing::error!(?message, "failed to encode control frame: {}", e),
    }
}
