//! # LAN Voice
//!
//! Real-time, bidirectional voice transport for local networks.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── CLIENT ─────────────────────────────┐
//! │                                                                  │
//! │  ┌──────────────┐   ┌──────────┐   ┌──────────────┐              │
//! │  │ CapturePort  │──▶│ VoxGate  │──▶│ FrameEncoder │              │
//! │  │ (cpal input) │   │ (dBFS)   │   │ (+ deflate)  │              │
//! │  └──────────────┘   └──────────┘   └──────┬───────┘              │
//! │     capture thread                        │ FrameQueue           │
//! │                                           ▼ (drop-oldest)        │
//! │                                    ┌──────────────┐              │
//! │                                    │ send thread  │──────┐       │
//! │                                    └──────────────┘      │       │
//! │  ┌──────────────┐   ┌──────────┐   ┌──────────────┐      │       │
//! │  │ PlaybackPort │◀──│  Jitter  │◀──│ FrameDecoder │◀──┐  │       │
//! │  │ (cpal output)│   │  Buffer  │   │ (+ inflate)  │   │  │       │
//! │  └──────────────┘   └──────────┘   └──────────────┘   │  │       │
//! │     receive/playback thread                           │  │       │
//! └───────────────────────────────────────────────────────┼──┼───────┘
//!                                                         │  │ TCP
//!                                                         │  ▼
//! ┌──────────────────────────── SERVER ──────────────────────────────┐
//! │  accept thread ──▶ PeerRegistry { id → Connection }               │
//! │  reader thread per peer: frame from P ──▶ every peer except P     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire frame: `[type u8][flags u8][length u32 BE][payload]`.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod network;
pub mod profile;
pub mod protocol;

pub use error::{Error, ErrorKind, Result};
pub use events::{EventSink, EventStream, VoiceEvent};
pub use network::client::{ConnectionState, VoiceClient};
pub use network::server::{ServerHandle, VoiceServer};
pub use profile::{AudioProfile, ProfileKind};

use audio::port::{CapturePort, PlaybackPort};
use config::{ClientConfig, ServerConfig};

/// Engine-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default TCP port for the voice server
    pub const DEFAULT_PORT: u16 = 12345;

    /// Default connect timeout
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// 16-bit PCM
    pub const BYTES_PER_SAMPLE: usize = 2;

    /// Accepted sample rates (Hz)
    pub const MIN_SAMPLE_RATE: u32 = 8_000;
    pub const MAX_SAMPLE_RATE: u32 = 48_000;

    /// Accepted capture buffer sizes (frames)
    pub const MIN_BUFFER_FRAMES: u32 = 128;
    pub const MAX_BUFFER_FRAMES: u32 = 8_192;

    /// Sender id plus sample count ahead of the PCM body
    pub const AUDIO_HEADER_LEN: usize = 8;

    /// Largest payload a peer may declare: 10x the largest raw audio frame
    pub const MAX_PAYLOAD_LEN: usize =
        10 * MAX_BUFFER_FRAMES as usize * BYTES_PER_SAMPLE + AUDIO_HEADER_LEN;

    /// Level reported for digital silence
    pub const LEVEL_FLOOR_DB: f32 = -96.0;

    /// VOX threshold domain (dBFS)
    pub const MIN_VOX_THRESHOLD_DB: f32 = -60.0;
    pub const MAX_VOX_THRESHOLD_DB: f32 = 0.0;

    /// Outgoing frames kept when the network falls behind
    pub const SEND_QUEUE_CAPACITY: usize = 8;

    /// Buffers collected before playout starts
    pub const JITTER_PREFILL: usize = 2;

    /// Buffers held before the oldest is dropped
    pub const JITTER_CAPACITY: usize = 4;

    /// Socket read timeout used to poll for shutdown
    pub const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// A peer that cannot accept a frame within this time is dropped
    pub const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

    /// Default cap on simultaneously connected peers
    pub const DEFAULT_MAX_PEERS: usize = 32;

    /// Default event channel depth
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Start a relay server on all interfaces.
pub fn start_server(port: u16, events: EventSink) -> Result<ServerHandle> {
    let config = ServerConfig {
        port,
        ..ServerConfig::default()
    };
    VoiceServer::start(config, events)
}

/// Connect a client to `address:port` with a fixed profile.
pub fn connect_client(
    address: &str,
    port: u16,
    profile: ProfileKind,
    capture: Box<dyn CapturePort>,
    playback: Box<dyn PlaybackPort>,
    events: EventSink,
) -> Result<VoiceClient> {
    let config = ClientConfig {
        host: address.to_string(),
        port,
        profile: profile::ProfileChoice::Fixed(profile),
        ..ClientConfig::default()
    };
    VoiceClient::connect(config, capture, playback, events)
}
