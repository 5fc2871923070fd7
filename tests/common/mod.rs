//! Shared fixtures: in-memory audio ports and raw protocol peers

#![allow(dead_code)]

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use lan_voice::audio::{CapturePort, PlaybackPort};
use lan_voice::codec::{FrameDecoder, FrameEncoder, ReadOutcome};
use lan_voice::config::{ClientConfig, CompressionSetting, ServerConfig};
use lan_voice::error::AudioError;
use lan_voice::events::{self, EventSink, EventStream};
use lan_voice::profile::{ProfileChoice, ProfileKind};
use lan_voice::protocol::{AudioFrame, ControlMessage, Frame, RawFrame};
use lan_voice::{ServerHandle, VoiceClient, VoiceEvent, VoiceServer};

pub const WAIT: Duration = Duration::from_secs(5);

/// Capture port fed by the test
pub struct ChannelCapture(pub Receiver<Vec<i16>>);

impl CapturePort for ChannelCapture {
    fn pull_buffer(&mut self, _frames: usize) -> Result<Option<Vec<i16>>, AudioError> {
        match self.0.recv_timeout(Duration::from_millis(20)) {
            Ok(samples) => Ok(Some(samples)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(Duration::from_millis(20));
                Ok(None)
            }
        }
    }
}

/// Playback port that hands every buffer back to the test
pub struct ChannelPlayback(pub Sender<Vec<i16>>);

impl PlaybackPort for ChannelPlayback {
    fn push_buffer(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        let _ = self.0.send(samples.to_vec());
        Ok(())
    }
}

pub fn start_server() -> (ServerHandle, EventStream) {
    start_server_with(ServerConfig {
        bind_address: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        ..ServerConfig::default()
    })
}

pub fn start_server_with(config: ServerConfig) -> (ServerHandle, EventStream) {
    let (sink, stream) = events::channel(1024);
    let server = VoiceServer::start(config, sink).expect("server starts");
    (server, stream)
}

pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Client wired to in-memory ports
pub struct TestClient {
    pub client: VoiceClient,
    pub mic: Sender<Vec<i16>>,
    pub speaker: Receiver<Vec<i16>>,
    pub events: EventStream,
}

pub fn client_config(addr: SocketAddr, profile: ProfileKind) -> ClientConfig {
    ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        profile: ProfileChoice::Fixed(profile),
        compression: CompressionSetting::Profile,
        ..ClientConfig::default()
    }
}

pub fn connect_client(config: ClientConfig) -> TestClient {
    let (mic, mic_rx) = unbounded();
    let (speaker_tx, speaker) = unbounded();
    let (sink, events) = events::channel(1024);
    let client = VoiceClient::connect(
        config,
        Box::new(ChannelCapture(mic_rx)),
        Box::new(ChannelPlayback(speaker_tx)),
        sink,
    )
    .expect("client connects");
    TestClient {
        client,
        mic,
        speaker,
        events,
    }
}

pub fn wait_event(
    events: &EventStream,
    mut matches: impl FnMut(&VoiceEvent) -> bool,
) -> Option<VoiceEvent> {
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

/// Speech-like test signal at roughly -10 dBFS
pub fn tone(len: usize) -> Vec<i16> {
    (0..len)
        .map(|i| {
            let t = i as f32 / 44_100.0;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 0.4 * i16::MAX as f32) as i16
        })
        .collect()
}

/// Protocol-level peer speaking directly to the server
pub struct RawPeer {
    pub stream: TcpStream,
    pub decoder: FrameDecoder,
    pub sender_id: u32,
}

impl RawPeer {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("tcp connect");
        stream.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut peer = RawPeer {
            stream,
            decoder: FrameDecoder::default(),
            sender_id: 0,
        };
        match peer.next_frame(WAIT) {
            Some(Frame::Control(ControlMessage::Welcome { sender_id, .. })) => {
                peer.sender_id = sender_id
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        peer
    }

    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write");
    }

    pub fn send_audio(&mut self, samples: &[i16]) -> Vec<u8> {
        let mut encoder = FrameEncoder::new(None);
        let bytes = encoder
            .encode(Frame::Audio(AudioFrame::from_pcm(self.sender_id, samples)))
            .unwrap()
            .to_vec();
        self.send_bytes(&bytes);
        bytes
    }

    /// Next envelope within `timeout`, payload uninterpreted
    pub fn next_raw(&mut self, timeout: Duration) -> Option<RawFrame> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.decoder.read_frame(&mut self.stream) {
                Ok(ReadOutcome::Frame(raw)) => return Some(raw),
                Ok(ReadOutcome::Idle) => continue,
                Ok(ReadOutcome::Closed) | Err(_) => return None,
            }
        }
        None
    }

    /// Next decoded frame within `timeout`
    pub fn next_frame(&mut self, timeout: Duration) -> Option<Frame> {
        let raw = self.next_raw(timeout)?;
        Some(Frame::from_raw(raw).expect("valid frame"))
    }

    /// Next audio frame, skipping control traffic
    pub fn next_audio(&mut self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.next_frame(remaining)? {
                Frame::Audio(audio) => return Some(audio),
                Frame::Control(_) => continue,
            }
        }
    }

    /// Next control message matching `matches`
    pub fn next_control(
        &mut self,
        timeout: Duration,
        mut matches: impl FnMut(&ControlMessage) -> bool,
    ) -> Option<ControlMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            if let Frame::Control(message) = self.next_frame(remaining)? {
                if matches(&message) {
                    return Some(message);
                }
            }
        }
    }

    /// True once the server has closed this peer's socket
    pub fn is_closed_by_server(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.decoder.read_frame(&mut self.stream) {
                Ok(ReadOutcome::Closed) | Err(_) => return true,
                Ok(_) => continue,
            }
        }
        false
    }
}

pub fn disabled_events() -> EventSink {
    EventSink::disabled()
}
