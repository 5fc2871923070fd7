//! Voice client
//!
//! Three threads share one connection:
//!
//! - capture: pull a buffer, meter it, gate it, encode it, queue it
//! - send: drain the queue onto the socket in order
//! - receive: decode frames, smooth them, push them to playback
//!
//! The capture thread never waits on the network. When the socket falls
//! behind, the oldest queued frames are dropped.

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use crossbeam::sync::Parker;
use parking_lot::Mutex;

use super::connection::Connection;
use super::socket::{configure_stream, connect, resolve};
use crate::audio::buffer::{FrameQueue, JitterBuffer};
use crate::audio::level::level_db;
use crate::audio::port::{CapturePort, PlaybackPort};
use crate::audio::vox::{TransmitDecision, VoxGate};
use crate::codec::{FrameDecoder, FrameEncoder, ReadOutcome};
use crate::config::ClientConfig;
use crate::constants::{
    JITTER_CAPACITY, JITTER_PREFILL, PEER_WRITE_TIMEOUT, READ_POLL_INTERVAL, SEND_QUEUE_CAPACITY,
};
use crate::error::{CodecError, ConnectFailureReason, Error, NetworkError, Result};
use crate::events::{EventSink, VoiceEvent};
use crate::profile::{AudioProfile, ProfileKind};
use crate::protocol::{ControlMessage, Frame};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Client status snapshot
#[derive(Debug, Clone)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub sender_id: u32,
    pub server_addr: SocketAddr,
    pub profile: ProfileKind,
    pub compression_level: Option<u32>,
    pub muted: bool,
    pub listening: bool,
    pub vox_enabled: bool,
    pub vox_threshold_db: f32,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_received: u64,
    /// Relayed frames whose payload could not be decoded
    pub frames_discarded: u64,
}

struct ClientShared {
    conn: Arc<Connection>,
    sender_id: u32,
    profile: &'static AudioProfile,
    compression_level: Option<u32>,
    events: EventSink,
    state: Mutex<ConnectionState>,
    shutdown: AtomicBool,
    muted: AtomicBool,
    listening: AtomicBool,
    vox: Mutex<VoxGate>,
    queue: Arc<FrameQueue<Bytes>>,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_discarded: AtomicU64,
    live_workers: AtomicUsize,
}

impl ClientShared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "client state");
            *state = next;
            self.events.emit(VoiceEvent::StateChanged(next));
        }
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Tear the session down after a fatal error. Only the first failure is
    /// reported.
    fn fail(&self, err: Error) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(kind = %err.kind(), "session ended: {}", err);
        self.set_state(ConnectionState::Disconnecting);
        self.events.error(&err);
        self.conn.close();
        self.queue.wake();
    }

    /// Skip a relayed frame that could not be decoded
    fn discard(&self, err: &CodecError) {
        let discarded = self.frames_discarded.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(discarded, "dropping undecodable frame: {}", err);
    }
}

/// Marks a worker thread alive; the last one out finishes the disconnect
struct WorkerGuard(Arc<ClientShared>);

impl WorkerGuard {
    fn enter(shared: &Arc<ClientShared>) -> Self {
        shared.live_workers.fetch_add(1, Ordering::AcqRel);
        WorkerGuard(shared.clone())
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.0.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.shutdown.store(true, Ordering::Release);
            self.0.conn.close();
            self.0.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Connected voice session
pub struct VoiceClient {
    shared: Arc<ClientShared>,
    capture_thread: Option<JoinHandle<()>>,
    send_thread: Option<JoinHandle<()>>,
    receive_thread: Option<JoinHandle<()>>,
}

impl VoiceClient {
    /// Connect, complete the handshake and start the session threads.
    ///
    /// Fails with a connect failure if the server cannot be reached or does
    /// not welcome us within `config.connect_timeout`.
    pub fn connect(
        config: ClientConfig,
        capture: Box<dyn CapturePort>,
        playback: Box<dyn PlaybackPort>,
        events: EventSink,
    ) -> Result<Self> {
        let profile = config.profile.resolve(config.latency_target_ms);
        if let Err(e) = config.validate().and_then(|()| profile.validate()) {
            let err = Error::from(e);
            events.error(&err);
            return Err(err);
        }
        let compression_level = config.compression.resolve(profile.compression_level);
        let vox = VoxGate::new(config.vox.clone())?;

        events.emit(VoiceEvent::StateChanged(ConnectionState::Connecting));
        let session = establish(&config).and_then(|handshake| announce(handshake, profile.kind));
        let (conn, reader, decoder) = match session {
            Ok(opened) => opened,
            Err(err) => {
                events.error(&err);
                events.emit(VoiceEvent::StateChanged(ConnectionState::Disconnected));
                return Err(err);
            }
        };
        let sender_id = conn.id();

        let (queue, parker) = FrameQueue::new(SEND_QUEUE_CAPACITY);
        let shared = Arc::new(ClientShared {
            conn,
            sender_id,
            profile,
            compression_level,
            events,
            state: Mutex::new(ConnectionState::Connecting),
            shutdown: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            listening: AtomicBool::new(true),
            vox: Mutex::new(vox),
            queue,
            frames_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            live_workers: AtomicUsize::new(0),
        });

        let mut client = VoiceClient {
            shared: shared.clone(),
            capture_thread: None,
            send_thread: None,
            receive_thread: None,
        };

        shared.set_state(ConnectionState::Connected);

        // Guards are taken before spawning so no worker can finish the
        // disconnect while others are still starting
        let capture_guard = WorkerGuard::enter(&shared);
        let send_guard = WorkerGuard::enter(&shared);
        let receive_guard = WorkerGuard::enter(&shared);

        client.receive_thread = Some(spawn("voice-receive", move || {
            receive_loop(&receive_guard.0, reader, decoder, playback);
        })?);
        client.send_thread = Some(spawn("voice-send", move || {
            send_loop(&send_guard.0, parker);
        })?);
        client.capture_thread = Some(spawn("voice-capture", move || {
            capture_loop(&capture_guard.0, capture);
        })?);

        tracing::info!(
            sender_id,
            server = %shared.conn.peer_addr(),
            profile = %profile.kind,
            compression = ?compression_level,
            "voice client connected"
        );
        Ok(client)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Identity assigned by the server
    pub fn sender_id(&self) -> u32 {
        self.shared.sender_id
    }

    pub fn profile(&self) -> &'static AudioProfile {
        self.shared.profile
    }

    pub fn set_vox_threshold(&self, threshold_db: f32) -> Result<()> {
        self.shared.vox.lock().set_threshold_db(threshold_db)?;
        tracing::info!(threshold_db, "vox threshold changed");
        Ok(())
    }

    pub fn set_vox_enabled(&self, enabled: bool) {
        self.shared.vox.lock().set_enabled(enabled);
        tracing::info!(enabled, "vox toggled");
    }

    /// Stop sending captured audio
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Release);
        tracing::info!(muted, "microphone mute changed");
    }

    /// Start or stop playing received audio
    pub fn set_listening(&self, listening: bool) {
        self.shared.listening.store(listening, Ordering::Release);
        tracing::info!(listening, "listening changed");
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    pub fn status(&self) -> ClientStatus {
        let shared = &self.shared;
        let (vox_enabled, vox_threshold_db) = {
            let vox = shared.vox.lock();
            (vox.settings().enabled, vox.settings().threshold_db)
        };
        ClientStatus {
            state: shared.state(),
            sender_id: shared.sender_id,
            server_addr: shared.conn.peer_addr(),
            profile: shared.profile.kind,
            compression_level: shared.compression_level,
            muted: self.is_muted(),
            listening: self.is_listening(),
            vox_enabled,
            vox_threshold_db,
            frames_sent: shared.frames_sent.load(Ordering::Relaxed),
            frames_dropped: shared.queue.dropped_count() as u64,
            frames_received: shared.frames_received.load(Ordering::Relaxed),
            frames_discarded: shared.frames_discarded.load(Ordering::Relaxed),
        }
    }

    /// Say goodbye, close the connection and join every thread
    pub fn disconnect(&mut self) {
        let graceful = !self.shared.shutdown.swap(true, Ordering::AcqRel);
        if graceful {
            self.shared.set_state(ConnectionState::Disconnecting);
        }
        self.shared.queue.wake();

        if let Some(handle) = self.send_thread.take() {
            let _ = handle.join();
        }
        if graceful {
            let goodbye = ControlMessage::Goodbye {
                sender_id: self.shared.sender_id,
            };
            if let Ok(bytes) = goodbye.to_bytes() {
                let _ = self.shared.conn.send(&bytes);
            }
        }
        self.shared.conn.close();

        let workers = [self.capture_thread.take(), self.receive_thread.take()];
        for handle in workers.into_iter().flatten() {
            let _ = handle.join();
        }
        if graceful {
            tracing::info!(sender_id = self.shared.sender_id, "voice client disconnected");
        }
    }
}

impl Drop for VoiceClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn spawn<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    Ok(thread::Builder::new().name(name.to_string()).spawn(f)?)
}

/// Server side of a completed welcome handshake
struct Handshake {
    stream: TcpStream,
    decoder: FrameDecoder,
    sender_id: u32,
    server_profile: ProfileKind,
}

/// TCP connect plus the welcome handshake, all within the connect timeout
fn establish(config: &ClientConfig) -> Result<Handshake> {
    let deadline = Instant::now() + config.connect_timeout;
    let target = format!("{}:{}", config.host, config.port);

    let addrs = resolve(&config.host, config.port)?;
    let mut stream = connect(&target, &addrs, deadline)?;
    configure_stream(&stream, config.tcp_nodelay, READ_POLL_INTERVAL, PEER_WRITE_TIMEOUT)?;

    let handshake_failed = |detail: String| NetworkError::ConnectFailed {
        target: target.clone(),
        reason: ConnectFailureReason::Handshake,
        detail,
    };

    let mut decoder = FrameDecoder::default();
    loop {
        if Instant::now() >= deadline {
            return Err(NetworkError::ConnectFailed {
                target,
                reason: ConnectFailureReason::Timeout,
                detail: "no welcome from server".into(),
            }
            .into());
        }
        match decoder.read_frame(&mut stream) {
            Ok(ReadOutcome::Frame(raw)) => match Frame::from_raw(raw) {
                Ok(Frame::Control(ControlMessage::Welcome { sender_id, profile })) => {
                    tracing::debug!(sender_id, %profile, "welcome received");
                    return Ok(Handshake {
                        stream,
                        decoder,
                        sender_id,
                        server_profile: profile,
                    });
                }
                Ok(other) => tracing::debug!(?other, "ignoring frame before welcome"),
                Err(e) => return Err(handshake_failed(e.to_string()).into()),
            },
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Closed) => {
                return Err(handshake_failed("server closed the connection".into()).into());
            }
            Err(e) => return Err(handshake_failed(e.to_string()).into()),
        }
    }
}

/// Wrap the handshaken stream and tell the other peers our profile
fn announce(
    handshake: Handshake,
    profile: ProfileKind,
) -> Result<(Arc<Connection>, TcpStream, FrameDecoder)> {
    let Handshake {
        stream,
        decoder,
        sender_id,
        server_profile,
    } = handshake;
    if server_profile != profile {
        tracing::info!(
            server = %server_profile,
            local = %profile,
            "server runs a different profile"
        );
    }

    let target = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "server".to_string());
    let handshake_failed = |detail: String| NetworkError::ConnectFailed {
        target: target.clone(),
        reason: ConnectFailureReason::Handshake,
        detail,
    };

    let (conn, reader) =
        Connection::new(sender_id, stream).map_err(|e| handshake_failed(e.to_string()))?;
    let message = ControlMessage::ProfileAnnounce { sender_id, profile };
    conn.send(&message.to_bytes()?)
        .map_err(|e| handshake_failed(format!("profile announce: {e}")))?;
    Ok((conn, reader, decoder))
}

fn capture_loop(shared: &ClientShared, mut capture: Box<dyn CapturePort>) {
    let frames = shared.profile.buffer_frames as usize;
    let mut encoder = FrameEncoder::new(shared.compression_level);
    let mut transmitting = false;

    while !shared.stopping() {
        let samples = match capture.pull_buffer(frames) {
            Ok(Some(samples)) => samples,
            Ok(None) => continue,
            Err(e) => {
                shared.fail(e.into());
                break;
            }
        };

        let level = level_db(&samples);
        shared.events.emit(VoiceEvent::LevelMeter { db: level });

        let decision = shared.vox.lock().evaluate_level(level, Instant::now());
        let open = decision == TransmitDecision::Transmit;
        if open != transmitting {
            transmitting = open;
            shared.events.emit(VoiceEvent::VoxChanged { transmitting });
        }
        if !open || shared.muted.load(Ordering::Acquire) {
            continue;
        }

        let encoded = encoder
            .encode_audio(shared.sender_id, &samples)
            .and_then(|frame| encoder.encode(Frame::Audio(frame)));
        match encoded {
            Ok(bytes) => {
                if !shared.queue.push(bytes) {
                    tracing::trace!(
                        dropped = shared.queue.dropped_count(),
                        "send queue full, dropped oldest frame"
                    );
                }
            }
            Err(e) => {
                shared.fail(e.into());
                break;
            }
        }
    }

    let stats = encoder.stats();
    tracing::debug!(
        frames = stats.frames_encoded,
        compressed = stats.compressed_frames,
        ratio = stats.compression_ratio,
        "capture loop exited"
    );
}

fn send_loop(shared: &ClientShared, parker: Parker) {
    while !shared.stopping() {
        let Some(bytes) = shared.queue.pop_timeout(&parker, READ_POLL_INTERVAL) else {
            continue;
        };
        match shared.conn.send(&bytes) {
            Ok(()) => {
                shared.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if !shared.stopping() {
                    shared.fail(e.into());
                }
                break;
            }
        }
    }
    tracing::debug!("send loop exited");
}

fn receive_loop(
    shared: &ClientShared,
    mut stream: TcpStream,
    mut decoder: FrameDecoder,
    mut playback: Box<dyn PlaybackPort>,
) {
    let mut jitter: JitterBuffer<Vec<i16>> = JitterBuffer::new(JITTER_CAPACITY, JITTER_PREFILL);

    while !shared.stopping() {
        let raw = match decoder.read_frame(&mut stream) {
            Ok(ReadOutcome::Frame(raw)) => raw,
            Ok(ReadOutcome::Idle) => {
                // Nothing arrived for a whole poll interval: play out the tail
                let tail: Vec<_> = jitter.drain_all().collect();
                if let Err(e) = tail.iter().try_for_each(|buf| playback.push_buffer(buf)) {
                    shared.fail(e.into());
                    break;
                }
                continue;
            }
            Ok(ReadOutcome::Closed) => {
                if !shared.stopping() {
                    shared.fail(NetworkError::Closed.into());
                }
                break;
            }
            Err(e) => {
                if !shared.stopping() {
                    shared.fail(NetworkError::from(e).into());
                }
                break;
            }
        };

        // Payloads come from other peers; a bad one costs that frame only
        let frame = match Frame::from_raw(raw) {
            Ok(frame) => frame,
            Err(e) => {
                shared.discard(&e);
                continue;
            }
        };

        match frame {
            Frame::Audio(audio) => {
                shared.frames_received.fetch_add(1, Ordering::Relaxed);
                if !shared.listening.load(Ordering::Acquire) {
                    continue;
                }
                let samples = match decoder.decode_audio(&audio) {
                    Ok(samples) => samples,
                    Err(e) => {
                        shared.discard(&e);
                        continue;
                    }
                };
                tracing::trace!(from = audio.sender_id, samples = samples.len(), "audio frame");
                jitter.insert(samples);
                if let Some(buf) = jitter.pop_ready() {
                    if let Err(e) = playback.push_buffer(&buf) {
                        shared.fail(e.into());
                        break;
                    }
                }
            }
            Frame::Control(message) => handle_control(shared, message),
        }
    }

    let stats = jitter.stats();
    tracing::debug!(
        received = stats.received,
        dropped = stats.dropped,
        underruns = stats.underruns,
        "receive loop exited"
    );
}

fn handle_control(shared: &ClientShared, message: ControlMessage) {
    match message {
        ControlMessage::PeerJoined { sender_id } => {
            tracing::info!(peer = sender_id, "peer joined");
            shared.events.emit(VoiceEvent::PeerJoined { sender_id });
        }
        ControlMessage::PeerLeft { sender_id } => {
            tracing::info!(peer = sender_id, "peer left");
            shared.events.emit(VoiceEvent::PeerLeft { sender_id });
        }
        ControlMessage::ProfileAnnounce { sender_id, profile } => {
            tracing::info!(peer = sender_id, %profile, "peer profile");
            shared.events.emit(VoiceEvent::ProfileAnnounced { sender_id, profile });
        }
        ControlMessage::Goodbye { sender_id } => {
            tracing::debug!(peer = sender_id, "peer said goodbye")
        }
        ControlMessage::Welcome { .. } | ControlMessage::Keepalive => {}
    }
}
